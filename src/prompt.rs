// Prompt assembly for scene generation

use crate::models::{CapabilityMode, CourseRequest};
use std::fmt::Write;

/// Class the generated code must define; the sandbox renders it by this name.
pub const ENTRY_POINT: &str = "CourseScene";

pub const DEFAULT_TITLE: &str = "Course";

const VOICEOVER_TEMPLATE: &str = include_str!("../prompts/scene_voiceover.txt");
const SILENT_TEMPLATE: &str = include_str!("../prompts/scene_silent.txt");

pub fn template(mode: CapabilityMode) -> &'static str {
    match mode {
        CapabilityMode::WithVoice => VOICEOVER_TEMPLATE,
        CapabilityMode::WithoutVoice => SILENT_TEMPLATE,
    }
}

pub fn render_course(course: &CourseRequest) -> String {
    let title = if course.title.trim().is_empty() {
        DEFAULT_TITLE
    } else {
        course.title.as_str()
    };

    let mut out = format!("Title: {}\n", title);
    if let Some(subject) = course.subject.as_deref().filter(|s| !s.is_empty()) {
        // writing to a String never fails
        let _ = write!(out, "Subject: {}\n\n", subject);
    }
    for (i, block) in course.blocks.iter().enumerate() {
        let _ = write!(out, "Block {}:\n{}\n\n", i + 1, block);
    }
    out
}

pub fn compose(course: &CourseRequest, mode: CapabilityMode) -> String {
    format!(
        "{}\n\nCourse Content:\n{}\n\nGenerate the {} class code:",
        template(mode).trim_end(),
        render_course(course),
        ENTRY_POINT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course() -> CourseRequest {
        CourseRequest {
            title: "Intro to Arrays".into(),
            subject: Some("CS".into()),
            blocks: vec![
                "Arrays are fundamental.".into(),
                "Insertion and deletion.".into(),
            ],
        }
    }

    #[test]
    fn prompt_contains_title_and_blocks_in_order() {
        for mode in [CapabilityMode::WithVoice, CapabilityMode::WithoutVoice] {
            let prompt = compose(&course(), mode);
            assert!(prompt.contains("Title: Intro to Arrays"));
            let first = prompt.find("Block 1:\nArrays are fundamental.").unwrap();
            let second = prompt.find("Block 2:\nInsertion and deletion.").unwrap();
            assert!(first < second);
        }
    }

    #[test]
    fn subject_line_only_when_present() {
        let mut c = course();
        assert!(render_course(&c).contains("Subject: CS\n"));
        c.subject = None;
        assert!(!render_course(&c).contains("Subject:"));
        c.subject = Some(String::new());
        assert!(!render_course(&c).contains("Subject:"));
    }

    #[test]
    fn blank_title_uses_placeholder() {
        let mut c = course();
        c.title = "  ".into();
        assert!(render_course(&c).starts_with("Title: Course\n"));
    }

    #[test]
    fn template_follows_mode() {
        let voiced = compose(&course(), CapabilityMode::WithVoice);
        let silent = compose(&course(), CapabilityMode::WithoutVoice);
        assert!(voiced.contains("VoiceoverScene"));
        assert!(voiced.contains("ElevenLabsService"));
        assert!(silent.contains("class CourseScene(Scene)"));
        assert!(!silent.contains("ElevenLabsService"));
        assert!(voiced.ends_with("Generate the CourseScene class code:"));
    }

    #[test]
    fn compose_is_deterministic() {
        let c = course();
        assert_eq!(
            compose(&c, CapabilityMode::WithVoice),
            compose(&c, CapabilityMode::WithVoice)
        );
    }
}
