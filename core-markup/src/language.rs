//! Code block language normalization.
//!
//! Fence language tags are free-form (`language-Python`, `py`, `JS`), while the
//! target accepts only a closed set of names. Anything outside the set falls
//! back to [`PLAIN_TEXT`].

/// Fallback language for unknown or missing tags.
pub const PLAIN_TEXT: &str = "plain text";

/// Languages accepted by the target's code block.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "bash",
    "c",
    "c#",
    "c++",
    "css",
    "diff",
    "docker",
    "go",
    "graphql",
    "haskell",
    "html",
    "java",
    "javascript",
    "json",
    "kotlin",
    "latex",
    "lua",
    "markdown",
    "matlab",
    "php",
    "plain text",
    "powershell",
    "python",
    "r",
    "ruby",
    "rust",
    "scala",
    "shell",
    "sql",
    "swift",
    "toml",
    "typescript",
    "xml",
    "yaml",
];

const ALIASES: &[(&str, &str)] = &[
    ("py", "python"),
    ("python3", "python"),
    ("js", "javascript"),
    ("ts", "typescript"),
    ("sh", "shell"),
    ("zsh", "shell"),
    ("cpp", "c++"),
    ("cc", "c++"),
    ("cs", "c#"),
    ("csharp", "c#"),
    ("rs", "rust"),
    ("yml", "yaml"),
    ("md", "markdown"),
    ("tex", "latex"),
    ("dockerfile", "docker"),
    ("text", "plain text"),
    ("plaintext", "plain text"),
];

/// Normalize a raw fence tag to a supported language name.
///
/// Lower-cases, strips a `language-` prefix, resolves aliases and validates
/// against [`SUPPORTED_LANGUAGES`].
pub fn normalize_language(raw: &str) -> &'static str {
    let lowered = raw.trim().to_lowercase();
    let tag = lowered.strip_prefix("language-").unwrap_or(&lowered);

    let resolved = ALIASES
        .iter()
        .find(|(alias, _)| *alias == tag)
        .map(|(_, name)| *name)
        .unwrap_or(tag);

    SUPPORTED_LANGUAGES
        .iter()
        .find(|name| **name == resolved)
        .copied()
        .unwrap_or(PLAIN_TEXT)
}

/// Pick the language tag out of a `class` attribute (`"hljs language-rust"`).
pub fn language_from_class(class: &str) -> Option<&str> {
    let mut tokens = class.split_whitespace();
    let first = class.split_whitespace().next();
    tokens
        .find(|token| token.starts_with("language-") || token.starts_with("lang-"))
        .map(|token| {
            token
                .strip_prefix("language-")
                .or_else(|| token.strip_prefix("lang-"))
                .unwrap_or(token)
        })
        .or(first)
}
