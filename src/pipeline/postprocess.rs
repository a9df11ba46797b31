//! Deterministic cleanup of VLM-generated Markdown.
//!
//! Models sometimes wrap their answer in a ```` ```markdown ```` fence, emit
//! CRLF line endings, invent placeholder image links or sprinkle zero-width
//! characters. Each quirk has one pure `&str → String` rule; [`RULES`] lists
//! them in the order they must run (fences before line handling, image links
//! before the final newline pass).

use once_cell::sync::Lazy;
use regex::Regex;

type Rule = fn(&str) -> String;

/// Cleanup rules in application order.
pub const RULES: &[(&str, Rule)] = &[
    ("strip-outer-fence", strip_outer_fence),
    ("line-endings", normalise_line_endings),
    ("trailing-whitespace", trim_trailing_whitespace),
    ("blank-lines", collapse_blank_lines),
    ("placeholder-images", drop_placeholder_images),
    ("invisible-chars", remove_invisible_chars),
    ("final-newline", ensure_final_newline),
];

/// Apply every rule in [`RULES`] to raw model output.
pub fn clean_markdown(input: &str) -> String {
    RULES
        .iter()
        .fold(input.to_string(), |text, (_, rule)| rule(&text))
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// At most one blank line between blocks.
fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

static RE_IMAGE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

const PLACEHOLDER_HOSTS: &[&str] = &[
    "example.com",
    "placeholder.com",
    "dummyimage.com",
    "placehold.it",
    "picsum.photos",
];

fn is_placeholder_url(url: &str) -> bool {
    let url = url.trim();
    let absolute = url.starts_with("http://") || url.starts_with("https://");
    !absolute || PLACEHOLDER_HOSTS.iter().any(|host| url.contains(host))
}

/// Replace image links the model could not have seen with their alt text.
fn drop_placeholder_images(input: &str) -> String {
    RE_IMAGE_LINK
        .replace_all(input, |caps: &regex::Captures<'_>| {
            if !is_placeholder_url(&caps[2]) {
                return caps[0].to_string();
            }
            match caps[1].trim() {
                "" => String::new(),
                alt => format!("*{alt}*"),
            }
        })
        .into_owned()
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'],
        "",
    )
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{trimmed}\n")
    }
}
