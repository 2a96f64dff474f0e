//! Heuristic detection of an unmodified scaffold artifact.
//!
//! This is a substring check against markers the default Next.js starter page
//! ships with. A page that was rewritten but happens to keep none of the
//! markers passes as custom even if it is still boilerplate (false negatives
//! are expected). It is not a structural diff against the template.

use serde::Serialize;

use crate::core::types::VerificationReport;

/// Markers that only appear on the untouched starter page.
pub const PLACEHOLDER_SIGNATURES: &[&str] = &[
    "Get started by editing",
    "Save and see your changes instantly",
    "/next.svg",
    "/vercel.svg",
    "Deploy now",
    "Read our docs",
];

/// Result of checking the primary artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactCheck {
    pub verified: bool,
    pub reason: String,
    pub preview: String,
}

impl ArtifactCheck {
    pub fn unreadable(path: &str, err: &str) -> Self {
        Self {
            verified: false,
            reason: format!("could not read {path}: {err}"),
            preview: String::new(),
        }
    }

    pub fn report(&self) -> VerificationReport {
        VerificationReport {
            verified: self.verified,
            reason: self.reason.clone(),
        }
    }
}

/// First placeholder signature found in `content`, if any.
pub fn placeholder_signature(content: &str) -> Option<&'static str> {
    PLACEHOLDER_SIGNATURES
        .iter()
        .copied()
        .find(|signature| content.contains(signature))
}

/// Classify the primary artifact `content` found at `path`.
pub fn check_artifact(path: &str, content: &str, preview_chars: usize) -> ArtifactCheck {
    let preview = preview(content, preview_chars);
    if content.trim().is_empty() {
        return ArtifactCheck {
            verified: false,
            reason: format!("{path} is empty"),
            preview,
        };
    }
    if let Some(signature) = placeholder_signature(content) {
        return ArtifactCheck {
            verified: false,
            reason: format!("{path} still contains the default template marker \"{signature}\""),
            preview,
        };
    }
    ArtifactCheck {
        verified: true,
        reason: format!("{path} contains custom content ({} bytes)", content.len()),
        preview,
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STARTER: &str = r#"import Image from "next/image";
export default function Home() {
  return (
    <main>
      <Image src="/next.svg" alt="Next.js logo" width={180} height={38} priority />
      <li>Get started by editing <code>app/page.tsx</code>.</li>
    </main>
  );
}
"#;

    #[test]
    fn starter_page_is_flagged() {
        let check = check_artifact("app/page.tsx", STARTER, 40);
        assert!(!check.verified);
        assert!(check.reason.contains("default template marker"));
        assert!(check.preview.ends_with("..."));
    }

    #[test]
    fn custom_page_passes() {
        let page = r#""use client";
export default function Page() { return <button>Count</button>; }"#;
        let check = check_artifact("app/page.tsx", page, 500);
        assert!(check.verified);
        assert_eq!(check.preview, page);
    }

    #[test]
    fn empty_page_is_not_verified() {
        let check = check_artifact("app/page.tsx", "\n  \n", 10);
        assert!(!check.verified);
        assert!(check.reason.contains("is empty"));
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("héllo", 2), "hé...");
        assert_eq!(preview("hi", 10), "hi");
    }
}
