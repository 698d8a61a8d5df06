use pulldown_cmark::{html, Event, Options, Parser, Tag, TagEnd};

fn options() -> Options {
    Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES
}

/// Render message markdown to HTML. Raw HTML in the source is shown as text.
pub fn render_html(input: &str) -> String {
    let parser = Parser::new_ext(input, options()).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut out = String::with_capacity(input.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Flatten markdown to readable text: formatting is dropped, block
/// boundaries become newlines and images become their alt text.
pub fn to_plain_text(input: &str) -> String {
    let mut out = String::new();

    for event in Parser::new_ext(input, options()) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::Heading(_))
            | Event::End(TagEnd::CodeBlock)
            | Event::End(TagEnd::Item) => {
                if !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Event::Start(Tag::Item) => out.push_str("- "),
            _ => {}
        }
    }

    out.trim_end().to_string()
}

/// Destinations of all images in the markdown, in order.
pub fn image_urls(input: &str) -> Vec<String> {
    Parser::new_ext(input, options())
        .filter_map(|event| match event {
            Event::Start(Tag::Image { dest_url, .. }) => Some(dest_url.to_string()),
            _ => None,
        })
        .collect()
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_basic_markdown() {
        let html = render_html("**bold** and `code`");
        assert_eq!(html, "<p><strong>bold</strong> and <code>code</code></p>\n");
    }

    #[test]
    fn test_render_escapes_raw_html() {
        let html = render_html("hi <script>alert(1)</script>");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_render_code_block() {
        let html = render_html("```rust\nfn main() {}\n```");
        assert!(html.contains("<pre><code class=\"language-rust\">fn main() {}\n</code></pre>"));
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(to_plain_text("# Title\n\nSome *em* text"), "Title\nSome em text");
        assert_eq!(to_plain_text("- one\n- two"), "- one\n- two");
        assert_eq!(to_plain_text("![Generated Image](https://x/y.png)"), "Generated Image");
    }

    #[test]
    fn test_image_urls() {
        let urls = image_urls("look ![a](https://x/1.png) and ![b](https://x/2.png)");
        assert_eq!(urls, vec!["https://x/1.png", "https://x/2.png"]);
        assert!(image_urls("[link](https://x)").is_empty());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
