//! Skills listing: markdown files the user drops into a skills directory.

use std::path::Path;

/// A discovered skill file.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    /// First non-empty, non-heading line of the file.
    pub summary: String,
}

/// List `.md` skills under `dir`, sorted by name.
pub fn list_skills(dir: &Path) -> Vec<Skill> {
    let mut skills = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return skills;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let summary = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(String::from)
            })
            .unwrap_or_default();
        skills.push(Skill { name, summary });
    }
    skills.sort_by(|a, b| a.name.cmp(&b.name));
    skills
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_markdown_files_with_summaries() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("review.md"),
            "# Review\n\nReview the current diff carefully.\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "not a skill").unwrap();

        let skills = list_skills(tmp.path());
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "review");
        assert_eq!(skills[0].summary, "Review the current diff carefully.");
    }

    #[test]
    fn missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list_skills(&tmp.path().join("nope")).is_empty());
    }
}
