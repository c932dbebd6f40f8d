//! Citation rewriting from transcript documents to public video links.
//!
//! The backend cites the transcript blob an answer was drawn from. Users
//! want the video itself, opened at the cited moment, so answer text is
//! rewritten in two passes:
//!
//! 1. Markdown links `[text](<prefix>Name.md)`, optionally followed by a
//!    `MM:SS` or `MM:SS-MM:SS` timestamp, become `[text MM:SS](<watch>ID&t=N)`.
//! 2. Bare transcript URLs left over become `<watch>ID`.
//!
//! Anything without a mapping is left byte-for-byte as it was. Rewritten
//! output never contains the transcript prefix again, so both passes are
//! idempotent.

use std::borrow::Cow;
use std::collections::HashMap;

use regex::{Captures, Regex};

use davenport_core::config::CitationConfig;

/// A resolved link to a public video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationLink {
    pub display_text: String,
    /// Public video id the transcript maps to.
    pub canonical_source_id: String,
    /// `MM:SS` or `MM:SS-MM:SS` as written after the link.
    pub timestamp: Option<String>,
}

impl CitationLink {
    /// Start offset in seconds, taken from the first bound of the timestamp.
    pub fn start_offset_secs(&self) -> Option<u32> {
        let first = self.timestamp.as_deref()?.split('-').next()?;
        let (minutes, seconds) = first.split_once(':')?;
        Some(minutes.parse::<u32>().ok()? * 60 + seconds.parse::<u32>().ok()?)
    }

    fn label(&self) -> String {
        match &self.timestamp {
            Some(ts) => format!("{} {}", self.display_text, ts),
            None => self.display_text.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CitationRewriter {
    markdown: Regex,
    prefix: String,
    watch_url_base: String,
    videos: HashMap<String, String>,
}

impl CitationRewriter {
    pub fn new(config: &CitationConfig) -> Result<Self, regex::Error> {
        let pattern = format!(
            r"\[([^\]]+)\]\(({}(.+?)\.md)\)(\s*([0-9]{{1,2}}:[0-9]{{2}}(?:-[0-9]{{1,2}}:[0-9]{{2}})?))?",
            regex::escape(&config.transcript_url_prefix)
        );

        Ok(Self {
            markdown: Regex::new(&pattern)?,
            prefix: config.transcript_url_prefix.clone(),
            watch_url_base: config.watch_url_base.clone(),
            videos: config
                .videos
                .iter()
                .map(|(name, id)| (name.clone(), id.clone()))
                .collect(),
        })
    }

    pub fn rewrite(&self, text: &str) -> String {
        if self.prefix.is_empty() || !text.contains(&self.prefix) {
            return text.to_string();
        }
        let linked = self.rewrite_markdown(text);
        self.rewrite_bare(&linked)
    }

    /// Every mapped markdown citation in `text`, in order of appearance.
    pub fn parse_links(&self, text: &str) -> Vec<CitationLink> {
        self.markdown
            .captures_iter(text)
            .filter_map(|caps| self.link_from(&caps))
            .collect()
    }

    fn link_from(&self, caps: &Captures<'_>) -> Option<CitationLink> {
        let id = self.lookup(&caps[3])?;
        Some(CitationLink {
            display_text: caps[1].to_string(),
            canonical_source_id: id.to_string(),
            timestamp: caps.get(5).map(|m| m.as_str().to_string()),
        })
    }

    fn lookup(&self, encoded_name: &str) -> Option<&str> {
        let name = urlencoding::decode(encoded_name).unwrap_or(Cow::Borrowed(encoded_name));
        self.videos.get(name.as_ref()).map(String::as_str)
    }

    fn watch_url(&self, link: &CitationLink) -> String {
        let mut url = format!("{}{}", self.watch_url_base, link.canonical_source_id);
        if let Some(secs) = link.start_offset_secs() {
            url.push_str(&format!("&t={}", secs));
        }
        url
    }

    fn rewrite_markdown<'t>(&self, text: &'t str) -> Cow<'t, str> {
        self.markdown.replace_all(text, |caps: &Captures<'_>| match self.link_from(caps) {
            Some(link) => format!("[{}]({})", link.label(), self.watch_url(&link)),
            None => caps[0].to_string(),
        })
    }

    fn rewrite_bare(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut copied = 0;
        let mut search_from = 0;

        while let Some(found) = text[search_from..].find(&self.prefix) {
            let start = search_from + found;
            let name_start = start + self.prefix.len();

            let Some((name_end, url_end)) = bare_url_end(text, name_start) else {
                let step = text[start..].chars().next().map_or(1, char::len_utf8);
                search_from = start + step;
                continue;
            };

            if let Some(id) = self.lookup(&text[name_start..name_end]) {
                out.push_str(&text[copied..start]);
                out.push_str(&self.watch_url_base);
                out.push_str(id);
                copied = url_end;
            }
            search_from = url_end;
        }

        out.push_str(&text[copied..]);
        out
    }
}

/// Locate the shortest `<name>.md` starting at `name_start` that is followed
/// by end of text, whitespace, a quote, or a closing bracket. Names are
/// non-empty and never span lines.
fn bare_url_end(text: &str, name_start: usize) -> Option<(usize, usize)> {
    let rest = &text[name_start..];
    let line = rest.split('\n').next().unwrap_or(rest);

    line.match_indices(".md")
        .map(|(idx, _)| idx)
        .filter(|&idx| idx > 0)
        .find(|&idx| {
            let after = idx + 3;
            match rest[after..].chars().next() {
                None => true,
                Some(c) => c.is_whitespace() || matches!(c, '"' | ')' | ']'),
            }
        })
        .map(|idx| (name_start + idx, name_start + idx + 3))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "https://stj6lw7vswhnnhw.blob.core.windows.net/video-training/";
    const STOCKING: &str = "Davenport%20Machine%20Model%20B%20-%20Stocking";

    fn rewriter() -> CitationRewriter {
        CitationRewriter::new(&CitationConfig::default()).unwrap()
    }

    fn internal_rewriter() -> CitationRewriter {
        let mut config = CitationConfig::default();
        config.transcript_url_prefix = "internal://vid/".to_string();
        config.videos.insert("Name".to_string(), "abc123XYZ".to_string());
        CitationRewriter::new(&config).unwrap()
    }

    #[test]
    fn test_markdown_link_with_timestamp_range() {
        let out = internal_rewriter().rewrite("[Intro](internal://vid/Name.md) 02:28-02:38");
        assert_eq!(
            out,
            "[Intro 02:28-02:38](https://www.youtube.com/watch?v=abc123XYZ&t=148)"
        );
    }

    #[test]
    fn test_markdown_link_without_timestamp() {
        let input = format!("See [the video]({}{}.md) for details.", PREFIX, STOCKING);
        assert_eq!(
            rewriter().rewrite(&input),
            "See [the video](https://www.youtube.com/watch?v=22tb3sbqquM) for details."
        );
    }

    #[test]
    fn test_names_with_parentheses() {
        let name = "Davenport%20Machine%20Model%20B%20-%20Basic%20Identification%20(part%202)";
        let input = format!("[Part 2]({}{}.md) 04:14", PREFIX, name);
        assert_eq!(
            rewriter().rewrite(&input),
            "[Part 2 04:14](https://www.youtube.com/watch?v=7NYKOGs6CDs&t=254)"
        );
    }

    #[test]
    fn test_unmapped_input_is_unchanged() {
        let inputs = [
            format!("[Intro]({}Unknown%20Video.md) 01:00", PREFIX),
            format!("Raw link {}Unknown.md here", PREFIX),
            "[Intro](internal://vid/Missing.md) 02:28-02:38".to_string(),
            format!("{}.md", PREFIX),
        ];
        let r = rewriter();
        let ir = internal_rewriter();
        for input in &inputs {
            assert_eq!(&r.rewrite(input), input);
            assert_eq!(&ir.rewrite(input), input);
        }
    }

    #[test]
    fn test_bare_url_is_rewritten_without_offset() {
        let input = format!("Source: {}{}.md\nNext line", PREFIX, STOCKING);
        assert_eq!(
            rewriter().rewrite(&input),
            "Source: https://www.youtube.com/watch?v=22tb3sbqquM\nNext line"
        );
    }

    #[test]
    fn test_bare_url_boundaries() {
        let r = rewriter();
        let quoted = format!("\"{}{}.md\"", PREFIX, STOCKING);
        assert_eq!(r.rewrite(&quoted), "\"https://www.youtube.com/watch?v=22tb3sbqquM\"");

        // `.md` glued to more text is not a transcript reference.
        let glued = format!("{}{}.mdx", PREFIX, STOCKING);
        assert_eq!(r.rewrite(&glued), glued);
    }

    #[test]
    fn test_mixed_markdown_and_bare() {
        let input = format!(
            "1. [Stocking]({p}{s}.md) 00:05\n2. {p}{s}.md",
            p = PREFIX,
            s = STOCKING
        );
        assert_eq!(
            rewriter().rewrite(&input),
            "1. [Stocking 00:05](https://www.youtube.com/watch?v=22tb3sbqquM&t=5)\n\
             2. https://www.youtube.com/watch?v=22tb3sbqquM"
        );
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let r = rewriter();
        let inputs = [
            format!("[a]({p}{s}.md) 10:00-11:00 and {p}{s}.md.", p = PREFIX, s = STOCKING),
            format!("[a]({p}X.md {p}{s}.md)", p = PREFIX, s = STOCKING),
            format!("[[nested]]({p}{s}.md)", p = PREFIX, s = STOCKING),
            format!("{p}{p}{s}.md", p = PREFIX, s = STOCKING),
            "plain text, no links at all".to_string(),
            String::new(),
        ];
        for input in &inputs {
            let once = r.rewrite(input);
            assert_eq!(r.rewrite(&once), once, "input {:?}", input);
        }
    }

    #[test]
    fn test_parse_links() {
        let input = format!(
            "[A]({p}{s}.md) 01:30 and [B]({p}Unknown.md)",
            p = PREFIX,
            s = STOCKING
        );
        let links = rewriter().parse_links(&input);
        assert_eq!(
            links,
            vec![CitationLink {
                display_text: "A".to_string(),
                canonical_source_id: "22tb3sbqquM".to_string(),
                timestamp: Some("01:30".to_string()),
            }]
        );
        assert_eq!(links[0].start_offset_secs(), Some(90));
    }

    #[test]
    fn test_start_offset() {
        let link = |ts: Option<&str>| CitationLink {
            display_text: String::new(),
            canonical_source_id: String::new(),
            timestamp: ts.map(str::to_string),
        };
        assert_eq!(link(Some("02:28-02:38")).start_offset_secs(), Some(148));
        assert_eq!(link(Some("9:05")).start_offset_secs(), Some(545));
        assert_eq!(link(None).start_offset_secs(), None);
    }
}
