//! Static language table.
//!
//! Maps public language ids onto engine language ids and toolchain
//! metadata. The table is fixed at compile time; external collaborators
//! validate submissions against it before anything is enqueued.

/// Configuration for a supported language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageSpec {
    /// Public language id used by submissions.
    pub id: u32,
    pub name: &'static str,
    pub version: &'static str,
    /// Source file extension, including the dot.
    pub extension: &'static str,
    /// Compile command template; `None` for interpreted languages.
    pub compile_command: Option<&'static str>,
    /// Run command template.
    pub run_command: &'static str,
    /// Language id understood by the sandbox engine.
    pub engine_id: &'static str,
}

/// All supported languages.
pub static LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        id: 1,
        name: "Python",
        version: "3.11.1",
        extension: ".py",
        compile_command: None,
        run_command: "/usr/local/bin/python3",
        engine_id: "python",
    },
    LanguageSpec {
        id: 2,
        name: "C++",
        version: "9.2.0",
        extension: ".cpp",
        compile_command: Some("g++ -o {executable} {source}"),
        run_command: "./{executable}",
        engine_id: "cpp",
    },
    LanguageSpec {
        id: 3,
        name: "Java",
        version: "13.0.1",
        extension: ".java",
        compile_command: Some("javac {source}"),
        run_command: "java {class_name}",
        engine_id: "java",
    },
];

/// Resolves a language by its public id.
pub fn language_by_id(id: u32) -> Option<&'static LanguageSpec> {
    LANGUAGES.iter().find(|lang| lang.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_languages_resolve() {
        let python = language_by_id(1).expect("python should exist");
        assert_eq!(python.engine_id, "python");
        assert!(python.compile_command.is_none());

        let cpp = language_by_id(2).expect("cpp should exist");
        assert_eq!(cpp.engine_id, "cpp");
        assert!(cpp.compile_command.is_some());
    }

    #[test]
    fn test_unknown_language_is_absent() {
        assert!(language_by_id(0).is_none());
        assert!(language_by_id(99).is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        for (i, a) in LANGUAGES.iter().enumerate() {
            for b in &LANGUAGES[i + 1..] {
                assert_ne!(a.id, b.id);
            }
        }
    }
}
