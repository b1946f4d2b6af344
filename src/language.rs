//! Static extension → language table.

use std::path::Path;

const LANGUAGES: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("pyi", "python"),
    ("go", "go"),
    ("js", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("java", "java"),
    ("kt", "kotlin"),
    ("swift", "swift"),
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("cs", "csharp"),
    ("rb", "ruby"),
    ("php", "php"),
    ("sh", "shell"),
    ("bash", "shell"),
    ("sql", "sql"),
    ("toml", "toml"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("json", "json"),
    ("html", "html"),
    ("css", "css"),
    ("md", "markdown"),
    ("markdown", "markdown"),
    ("rst", "restructuredtext"),
    ("txt", "text"),
];

/// Special file names that have no extension but a well-known language.
const NAMED: &[(&str, &str)] = &[
    ("Dockerfile", "dockerfile"),
    ("Makefile", "makefile"),
];

/// Derive a language tag from a path's extension (case-insensitive).
pub fn detect(path: &str) -> Option<&'static str> {
    let p = Path::new(path);
    if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
        if let Some((_, lang)) = NAMED.iter().find(|(n, _)| *n == name) {
            return Some(lang);
        }
    }
    let ext = p.extension()?.to_str()?.to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(detect("src/main.rs"), Some("rust"));
        assert_eq!(detect("app/views.PY"), Some("python"));
        assert_eq!(detect("README.md"), Some("markdown"));
        assert_eq!(detect("deploy/Dockerfile"), Some("dockerfile"));
    }

    #[test]
    fn unknown_or_missing_extension() {
        assert_eq!(detect("data.bin"), None);
        assert_eq!(detect("LICENSE"), None);
    }
}
