//! Bitbucket markup to GitHub markdown.
//!
//! The stages run in a fixed order: changeset references, code blocks,
//! issue links, mentions. Link rewriting has to see the text after changeset
//! lines are gone, and mentions are rewritten last so that nothing produced
//! by earlier stages gets remapped.

use crate::types::{ChangesetMode, RepoSlug};
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Marker Bitbucket puts in front of a commit back-reference.
const CHANGESET_MARKER: &str = "→ <<cset ";

/// Code block delimiters in Bitbucket wiki markup.
const BLOCK_OPEN: &str = "{{{";
const BLOCK_CLOSE: &str = "}}}";

/// Bare hashes shorter than this must contain a digit to be linked.
const SHORT_HASH_LEN: usize = 12;

/// Source issue number to target issue number.
pub type IssueIdMap = HashMap<u64, u64>;

/// Applies the full transform chain to issue and comment bodies.
#[derive(Debug, Clone)]
pub struct TextTransformer {
    changeset_mode: ChangesetMode,
    commit_base: String,
    issue_link: Regex,
    changeset: Regex,
    mention: Regex,
    user_mapping: HashMap<String, String>,
}

impl TextTransformer {
    /// Build a transformer for one source repository.
    pub fn new(
        source_web_url: &str,
        source_repo: &RepoSlug,
        changeset_mode: ChangesetMode,
        user_mapping: HashMap<String, String>,
    ) -> Self {
        let host = source_web_url
            .trim_end_matches('/')
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let issue_link = Regex::new(&format!(
            r"(?i)https?://{}/{}/{}/issues?/(\d+)(?:/(?:[\w\-.~%]*[\w\-~%])?)*",
            regex::escape(host),
            regex::escape(&source_repo.owner),
            regex::escape(&source_repo.name),
        ))
        .expect("issue link pattern is valid");

        Self {
            changeset_mode,
            commit_base: format!(
                "{}/{}/{}/commits",
                source_web_url.trim_end_matches('/'),
                source_repo.owner,
                source_repo.name
            ),
            issue_link,
            changeset: Regex::new(r"(?:<<cset\s+([0-9a-f]{6,40})>>)|\b([0-9a-f]{6,40})\b")
                .expect("changeset pattern is valid"),
            mention: Regex::new(r"(^|[^\w.@])@([A-Za-z0-9_][A-Za-z0-9_\-]*)")
                .expect("mention pattern is valid"),
            user_mapping,
        }
    }

    /// Run every stage in order.
    pub fn transform(&self, text: &str, id_map: &IssueIdMap) -> String {
        let text = match self.changeset_mode {
            ChangesetMode::Strip => strip_changesets(text),
            ChangesetMode::Link => self.link_changesets(text),
        };
        let text = convert_code_blocks(&text);
        let text = self.rewrite_issue_links(&text, id_map);
        self.rewrite_mentions(&text)
    }

    /// Replace links to source issues with `#<number>` references.
    pub fn rewrite_issue_links(&self, text: &str, id_map: &IssueIdMap) -> String {
        self.issue_link
            .replace_all(text, |caps: &Captures| {
                let source_id = &caps[1];
                match source_id.parse::<u64>().ok().and_then(|id| id_map.get(&id)) {
                    Some(target_id) => format!("#{target_id}"),
                    None => format!("#{source_id}"),
                }
            })
            .into_owned()
    }

    /// Replace `@user` mentions that have an explicit mapping.
    pub fn rewrite_mentions(&self, text: &str) -> String {
        if self.user_mapping.is_empty() {
            return text.to_string();
        }
        self.mention
            .replace_all(text, |caps: &Captures| match self.user_mapping.get(&caps[2]) {
                Some(mapped) => format!("{}@{mapped}", &caps[1]),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Turn revision hashes into links to the source commit view.
    pub fn link_changesets(&self, text: &str) -> String {
        self.changeset
            .replace_all(text, |caps: &Captures| {
                let whole = caps.get(0).expect("group 0 always matches");
                if let Some(hash) = caps.get(1) {
                    return self.commit_link(hash.as_str());
                }

                let hash = &caps[2];
                let preceded_by = text[..whole.start()].chars().next_back();
                if matches!(preceded_by, Some('/' | '#' | '=' | '[')) {
                    return whole.as_str().to_string();
                }
                // Numbers and words made only of a-f are not hashes.
                let has_digit = hash.chars().any(|c| c.is_ascii_digit());
                let has_letter = hash.chars().any(|c| c.is_ascii_alphabetic());
                if !has_letter || (hash.len() < SHORT_HASH_LEN && !has_digit) {
                    return whole.as_str().to_string();
                }
                self.commit_link(hash)
            })
            .into_owned()
    }

    fn commit_link(&self, hash: &str) -> String {
        format!("[{hash}]({}/{hash})", self.commit_base)
    }
}

/// Drop every line that is a changeset back-reference.
pub fn strip_changesets(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with(CHANGESET_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert `{{{ }}}` code markup to markdown.
pub fn convert_code_blocks(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_block = false;

    for line in text.lines() {
        let trimmed = line.trim_start();

        if in_block {
            if let Some(rest) = trimmed.strip_prefix(BLOCK_CLOSE) {
                in_block = false;
                lines.push(String::new());
                if !rest.trim().is_empty() {
                    lines.push(rest.trim_start().to_string());
                }
            } else if let Some(content) = line.trim_end().strip_suffix(BLOCK_CLOSE) {
                in_block = false;
                if !content.trim().is_empty() {
                    lines.push(format!("    {content}"));
                }
                lines.push(String::new());
            } else {
                lines.push(format!("    {line}"));
            }
            continue;
        }

        match trimmed.strip_prefix(BLOCK_OPEN) {
            Some(rest) if !rest.contains(BLOCK_CLOSE) => {
                in_block = true;
                if lines.last().is_some_and(|last| !last.trim().is_empty()) {
                    lines.push(String::new());
                }
                let rest = rest.trim_end();
                if !rest.trim().is_empty() && !rest.trim_start().starts_with("#!") {
                    lines.push(format!("    {rest}"));
                }
            }
            _ => lines.push(line.replace(BLOCK_OPEN, "`").replace(BLOCK_CLOSE, "`")),
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer(mode: ChangesetMode) -> TextTransformer {
        let mut mapping = HashMap::new();
        mapping.insert("bbuser".to_string(), "ghuser".to_string());
        TextTransformer::new(
            "https://bitbucket.org",
            &RepoSlug::new("owner", "repo"),
            mode,
            mapping,
        )
    }

    #[test]
    fn test_strip_changesets() {
        let text = "Fixed it.\n→ <<cset 1a2b3c4d5e6f>>\nThanks";
        assert_eq!(strip_changesets(text), "Fixed it.\nThanks");
    }

    #[test]
    fn test_link_changesets() {
        let t = transformer(ChangesetMode::Link);

        let linked = t.link_changesets("→ <<cset 1a2b3c4d5e6f>>");
        assert_eq!(
            linked,
            "→ [1a2b3c4d5e6f](https://bitbucket.org/owner/repo/commits/1a2b3c4d5e6f)"
        );

        let linked = t.link_changesets("fixed in abc1234 and deadbeef");
        assert!(linked.contains("[abc1234](https://bitbucket.org/owner/repo/commits/abc1234)"));
        // Short and all letters: an ordinary word, not a hash.
        assert!(linked.ends_with("and deadbeef"));

        let url = "see https://example.com/abc1234def";
        assert_eq!(t.link_changesets(url), url);

        let numbers = "released 20130401, 1234567 rows, build 123456789012345";
        assert_eq!(t.link_changesets(numbers), numbers);
    }

    #[test]
    fn test_inline_code() {
        assert_eq!(
            convert_code_blocks("call {{{foo()}}} first"),
            "call `foo()` first"
        );
        assert_eq!(convert_code_blocks("{{{foo()}}}"), "`foo()`");
    }

    #[test]
    fn test_multiline_block() {
        let text = "Trace:\n{{{\nline one\n  line two\n}}}\nafter";
        assert_eq!(
            convert_code_blocks(text),
            "Trace:\n\n    line one\n      line two\n\nafter"
        );
    }

    #[test]
    fn test_block_with_shebang_and_trailing_close() {
        let text = "{{{#!python\nprint(1)\nprint(2)}}}";
        assert_eq!(convert_code_blocks(text), "    print(1)\n    print(2)\n");
    }

    #[test]
    fn test_code_blocks_idempotent() {
        let text = "a {{{x}}}\n{{{\nfn main() {}\n}}}\nend";
        let once = convert_code_blocks(text);
        assert!(!once.contains(BLOCK_OPEN) && !once.contains(BLOCK_CLOSE));
        assert_eq!(convert_code_blocks(&once), once);
    }

    #[test]
    fn test_issue_links_fallback_and_mapped() {
        let t = transformer(ChangesetMode::Strip);
        let text = "dup of https://bitbucket.org/owner/repo/issue/42/some-title";

        assert_eq!(t.rewrite_issue_links(text, &IssueIdMap::new()), "dup of #42");

        let mut map = IssueIdMap::new();
        map.insert(42, 57);
        assert_eq!(t.rewrite_issue_links(text, &map), "dup of #57");
    }

    #[test]
    fn test_issue_links_keep_sentence_punctuation() {
        let t = transformer(ChangesetMode::Strip);
        let text = "Same as https://bitbucket.org/owner/repo/issue/42/some-title. Closing.";
        assert_eq!(
            t.rewrite_issue_links(text, &IssueIdMap::new()),
            "Same as #42. Closing."
        );
        let text = "see https://bitbucket.org/owner/repo/issues/7/v1.2-crash/.";
        assert_eq!(t.rewrite_issue_links(text, &IssueIdMap::new()), "see #7.");
    }

    #[test]
    fn test_issue_links_other_repo_untouched() {
        let t = transformer(ChangesetMode::Strip);
        let text = "https://bitbucket.org/someone/else/issue/3";
        assert_eq!(t.rewrite_issue_links(text, &IssueIdMap::new()), text);
    }

    #[test]
    fn test_mentions() {
        let t = transformer(ChangesetMode::Strip);
        assert_eq!(
            t.rewrite_mentions("thanks @bbuser and @other"),
            "thanks @ghuser and @other"
        );
        assert_eq!(t.rewrite_mentions("mail bob@bbuser.org"), "mail bob@bbuser.org");
        assert_eq!(t.rewrite_mentions("@bbuser: done"), "@ghuser: done");
    }

    #[test]
    fn test_stage_order() {
        let t = transformer(ChangesetMode::Strip);
        let text = "→ <<cset abcdef123456>> https://bitbucket.org/owner/repo/issue/9\n\
                    see https://bitbucket.org/owner/repo/issue/9 cc @bbuser {{{x}}}";
        assert_eq!(
            t.transform(text, &IssueIdMap::new()),
            "see #9 cc @ghuser `x`"
        );
    }
}
