use crate::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::ops::Range;

const COMMENT_OPEN: &[u8] = b"<!--";
const COMMENT_CLOSE: &[u8] = b"-->";
const CDATA_OPEN: &[u8] = b"<![cdata[";
const CDATA_CLOSE: &[u8] = b"]]>";

static ATTRIBUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][-\w:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("attribute pattern")
});

/// A markup element located by a loose scan: its attributes (lowercased
/// names, unescaped values) and the raw text between its tags.
#[derive(Debug, Clone)]
pub struct Element<'a> {
    attributes: HashMap<String, String>,
    pub inner: &'a str,
    span: Range<usize>,
}

impl Element<'_> {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// The three hidden regions of a project document.
#[derive(Debug)]
pub struct Segments<'a> {
    content: &'a str,
    // Lowercased copy of `content` with comments and CDATA blanked out, so
    // element searches never match inside hidden text. Byte offsets are
    // shared with `content`.
    scan: Vec<u8>,
    pub comments: Vec<&'a str>,
    pub using_tasks: Vec<Element<'a>>,
    pub target: &'a str,
}

impl<'a> Segments<'a> {
    /// Elements named `name` nested inside `parent`.
    pub fn children(&self, parent: &Element<'_>, name: &str) -> Vec<Element<'a>> {
        find_elements(self.content, &self.scan, name, parent.span.clone())
    }
}

/// Splits a document into its comment blocks, `UsingTask` elements and
/// the inner text of the first `Target` element.
///
/// # Errors
///
/// Each of the three regions is required.
pub fn segment(content: &str) -> Result<Segments<'_>, ParseError> {
    let (comments, scan) = scan_hidden(content);
    if comments.is_empty() {
        return Err(ParseError::MissingComments);
    }

    let using_tasks = find_elements(content, &scan, "usingtask", 0..content.len());
    if using_tasks.is_empty() {
        return Err(ParseError::MissingUsingTask);
    }

    let target = find_elements(content, &scan, "target", 0..content.len())
        .into_iter()
        .next()
        .ok_or(ParseError::MissingTarget)?
        .inner;

    Ok(Segments {
        content,
        scan,
        comments,
        using_tasks,
        target,
    })
}

/// Text of an element body: the first CDATA section if there is one,
/// otherwise the raw body.
pub fn text_content(inner: &str) -> &str {
    let lower = inner.as_bytes().to_ascii_lowercase();
    let Some(start) = find_subslice(&lower, CDATA_OPEN) else {
        return inner;
    };
    let start = start + CDATA_OPEN.len();
    let end = find_subslice(&lower[start..], CDATA_CLOSE).map_or(inner.len(), |p| start + p);
    &inner[start..end]
}

fn scan_hidden(content: &str) -> (Vec<&str>, Vec<u8>) {
    let mut scan = content.as_bytes().to_ascii_lowercase();
    let mut comments = Vec::new();
    let mut idx = 0;
    loop {
        let comment = find_subslice(&scan[idx..], COMMENT_OPEN).map(|p| idx + p);
        let cdata = find_subslice(&scan[idx..], CDATA_OPEN).map(|p| idx + p);
        let (start, open, close) = match (comment, cdata) {
            (Some(c), Some(d)) if d < c => (d, CDATA_OPEN, CDATA_CLOSE),
            (Some(c), _) => (c, COMMENT_OPEN, COMMENT_CLOSE),
            (None, Some(d)) => (d, CDATA_OPEN, CDATA_CLOSE),
            (None, None) => break,
        };
        let body_start = start + open.len();
        // Unterminated regions run to the end of the document
        let (body_end, end) = match find_subslice(&scan[body_start..], close) {
            Some(p) => (body_start + p, body_start + p + close.len()),
            None => (scan.len(), scan.len()),
        };
        if open == COMMENT_OPEN {
            comments.push(&content[body_start..body_end]);
        }
        scan[start..end].fill(b' ');
        idx = end;
    }
    (comments, scan)
}

fn find_elements<'a>(
    content: &'a str,
    scan: &[u8],
    name: &str,
    range: Range<usize>,
) -> Vec<Element<'a>> {
    let open = format!("<{}", name.to_ascii_lowercase());
    let close = format!("</{}", name.to_ascii_lowercase());
    let mut out = Vec::new();
    let mut idx = range.start;
    while let Some(pos) = find_subslice(&scan[idx..range.end], open.as_bytes()) {
        let name_end = idx + pos + open.len();
        match scan.get(name_end) {
            Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => {}
            _ => {
                idx = name_end;
                continue;
            }
        }
        let Some(tag_end) = find_tag_end(&scan[name_end..range.end]).map(|p| name_end + p) else {
            break;
        };
        let attributes = parse_attributes(&content[name_end..tag_end]);
        let body_start = tag_end + 1;
        let (span, next) = if scan[tag_end - 1] == b'/' {
            (body_start..body_start, body_start)
        } else {
            match find_subslice(&scan[body_start..range.end], close.as_bytes()) {
                Some(p) => (body_start..body_start + p, body_start + p + close.len()),
                None => (body_start..range.end, range.end),
            }
        };
        out.push(Element {
            attributes,
            inner: &content[span.clone()],
            span,
        });
        idx = next;
    }
    out
}

// Position of the '>' closing a start tag, ignoring any inside quoted values
fn find_tag_end(bytes: &[u8]) -> Option<usize> {
    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate() {
        match (quote, b) {
            (None, b'"' | b'\'') => quote = Some(b),
            (Some(q), _) if q == b => quote = None,
            (None, b'>') => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_attributes(tag: &str) -> HashMap<String, String> {
    ATTRIBUTE_RE
        .captures_iter(tag)
        .map(|caps| {
            let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            (caps[1].to_ascii_lowercase(), unescape(value))
        })
        .collect()
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<Project xmlns="http://schemas.microsoft.com/developer/msbuild/2003">
<!-- first
echo hi -->
<UsingTask TaskName="Stub" TaskFactory="CodeTaskFactory" AssemblyFile="C:\Windows\Microsoft.Build.Tasks.v4.0.dll">
  <Task>
    <Code Type="Class" Language="cs"><![CDATA[ <!-- not a comment --> class A {} ]]></Code>
  </Task>
</UsingTask>
<usingtask taskname="Second" assemblyfile="b&amp;c.dll" />
<!--blob-->
<Target Name="Build">&lt;Second A="00" /&gt;</Target>
</Project>"#;

    #[test]
    fn segments_document() {
        let segments = segment(DOC).unwrap();
        assert_eq!(segments.comments, vec![" first\necho hi ", "blob"]);
        assert_eq!(segments.using_tasks.len(), 2);
        assert_eq!(segments.using_tasks[0].attribute("taskname"), Some("Stub"));
        assert_eq!(segments.using_tasks[1].attribute("assemblyfile"), Some("b&c.dll"));
        assert_eq!(segments.using_tasks[1].inner, "");
        assert_eq!(segments.target, r#"&lt;Second A="00" /&gt;"#);
    }

    #[test]
    fn finds_nested_code_and_cdata() {
        let segments = segment(DOC).unwrap();
        let code = segments.children(&segments.using_tasks[0], "code");
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].attribute("language"), Some("cs"));
        assert_eq!(text_content(code[0].inner).trim(), "<!-- not a comment --> class A {}");
    }

    #[test]
    fn text_content_without_cdata_is_raw() {
        assert_eq!(text_content(" plain "), " plain ");
    }

    #[test]
    fn element_names_need_a_boundary() {
        let doc = "<!--x--><UsingTasks/><UsingTask TaskName=\"A\"/><Target></Target>";
        let segments = segment(doc).unwrap();
        assert_eq!(segments.using_tasks.len(), 1);
        assert_eq!(segments.using_tasks[0].attribute("taskname"), Some("A"));
    }

    #[test]
    fn quoted_angle_brackets_stay_in_the_tag() {
        let doc = r#"<!--x--><UsingTask TaskName="a>b"/><Target></Target>"#;
        let segments = segment(doc).unwrap();
        assert_eq!(segments.using_tasks[0].attribute("taskname"), Some("a>b"));
    }

    #[test]
    fn missing_regions_are_reported() {
        assert_eq!(
            segment("<UsingTask/><Target/>").unwrap_err(),
            ParseError::MissingComments
        );
        assert_eq!(
            segment("<!--a--><Target></Target>").unwrap_err(),
            ParseError::MissingUsingTask
        );
        assert_eq!(
            segment("<!--a--><UsingTask TaskName=\"x\"/>").unwrap_err(),
            ParseError::MissingTarget
        );
    }
}
