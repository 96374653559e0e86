// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Confluence storage-format serialization.

use std::fmt::Write as _;

use pulldown_cmark::Alignment;

use super::document::{Block, Inline};

const PARAGRAPH_STYLE: &str = "margin: 12px 0; line-height: 1.6;";
const LIST_STYLE: &str = "margin: 12px 0; padding-left: 24px;";
const ITEM_STYLE: &str = "margin: 4px 0;";
const TABLE_STYLE: &str = "border-collapse: collapse; width: 100%; margin: 16px 0;";
const CELL_STYLE: &str = "border: 1px solid #DFE1E6; padding: 12px;";
const RULE_STYLE: &str = "border: none; border-top: 1px solid #DFE1E6; margin: 24px 0;";
const LAYOUT_STYLE: &str = "margin: 20px 0;";

const TOC_MACRO: &str = r#"<ac:structured-macro ac:name="toc"><ac:parameter ac:name="printable">true</ac:parameter></ac:structured-macro>"#;

pub fn diagram_filename(number: usize) -> String {
    format!("diagram-{number}.png")
}

/// Serialize the tree and wrap it in the single-column page layout.
pub fn render_page(blocks: &[Block]) -> String {
    let mut writer = StorageWriter::default();
    writer.blocks(blocks);
    wrap_in_layout(&writer.out)
}

pub fn wrap_in_layout(body: &str) -> String {
    format!(
        r#"<ac:layout><ac:layout-section ac:type="single"><ac:layout-cell><div style="{LAYOUT_STYLE}">{body}</div></ac:layout-cell></ac:layout-section></ac:layout>"#
    )
}

pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    push_escaped(&mut out, text);
    out
}

fn push_escaped(out: &mut String, text: &str) {
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
}

/// CDATA section holding `text` verbatim, splitting any `]]>` across two sections.
fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

#[derive(Default)]
struct StorageWriter {
    out: String,
    toc_written: bool,
}

impl StorageWriter {
    fn blocks(&mut self, blocks: &[Block]) {
        for block in blocks {
            self.block(block);
        }
    }

    fn block(&mut self, block: &Block) {
        match block {
            Block::Heading { level, content } => {
                let _ = write!(self.out, "<h{level}>");
                self.inlines(content);
                let _ = write!(self.out, "</h{level}>");
            }
            Block::Paragraph(content) => {
                let _ = write!(self.out, r#"<p style="{PARAGRAPH_STYLE}">"#);
                self.inlines(content);
                self.out.push_str("</p>");
            }
            Block::Plain(content) => self.inlines(content),
            Block::CodeBlock { language, code } => {
                self.out.push_str(r#"<ac:structured-macro ac:name="code">"#);
                if let Some(language) = language {
                    self.out.push_str(r#"<ac:parameter ac:name="language">"#);
                    push_escaped(&mut self.out, language);
                    self.out.push_str("</ac:parameter>");
                }
                let code = code.strip_suffix('\n').unwrap_or(code);
                let _ = write!(self.out, "<ac:plain-text-body>{}</ac:plain-text-body>", cdata(code));
                self.out.push_str("</ac:structured-macro>");
            }
            Block::Quote(children) => self.rich_macro("quote", children),
            Block::Callout { kind, body } => self.rich_macro(kind.macro_name(), body),
            Block::List { start, items } => {
                match start {
                    Some(1) => {
                        let _ = write!(self.out, r#"<ol style="{LIST_STYLE}">"#);
                    }
                    Some(n) => {
                        let _ = write!(self.out, r#"<ol start="{n}" style="{LIST_STYLE}">"#);
                    }
                    None => {
                        let _ = write!(self.out, r#"<ul style="{LIST_STYLE}">"#);
                    }
                }
                for item in items {
                    let _ = write!(self.out, r#"<li style="{ITEM_STYLE}">"#);
                    self.blocks(item);
                    self.out.push_str("</li>");
                }
                self.out.push_str(if start.is_some() { "</ol>" } else { "</ul>" });
            }
            Block::Table {
                alignments,
                head,
                rows,
            } => self.table(alignments, head, rows),
            Block::Rule => {
                let _ = write!(self.out, r#"<hr style="{RULE_STYLE}" />"#);
            }
            Block::Html(html) => self.out.push_str(html),
            Block::TocMarker => {
                if !self.toc_written {
                    self.out.push_str(TOC_MACRO);
                    self.toc_written = true;
                }
            }
            Block::DiagramImage { number } => {
                let _ = write!(
                    self.out,
                    concat!(
                        r#"<ac:structured-macro ac:name="expand">"#,
                        r#"<ac:parameter ac:name="title">📊 Diagram {number}</ac:parameter>"#,
                        r#"<ac:rich-text-body><p style="text-align: center;">"#,
                        r#"<ac:image ac:width="800"><ri:attachment ri:filename="{filename}" /></ac:image>"#,
                        r#"</p></ac:rich-text-body></ac:structured-macro>"#
                    ),
                    number = number,
                    filename = diagram_filename(*number),
                );
            }
            Block::DiagramWarning { number, message } => {
                self.warning(&format!("⚠️ Failed to render diagram {number}: {message}"));
            }
            Block::DiagramPlaceholder(index) => {
                self.warning(&format!("⚠️ Failed to render diagram {}: not rendered", index + 1));
            }
        }
    }

    fn rich_macro(&mut self, name: &str, body: &[Block]) {
        let _ = write!(
            self.out,
            r#"<ac:structured-macro ac:name="{name}"><ac:rich-text-body>"#
        );
        self.blocks(body);
        self.out.push_str("</ac:rich-text-body></ac:structured-macro>");
    }

    fn warning(&mut self, text: &str) {
        self.out
            .push_str(r#"<ac:structured-macro ac:name="warning"><ac:rich-text-body><p>"#);
        push_escaped(&mut self.out, text);
        self.out.push_str("</p></ac:rich-text-body></ac:structured-macro>");
    }

    fn table(&mut self, alignments: &[Alignment], head: &[Vec<Inline>], rows: &[Vec<Vec<Inline>>]) {
        let _ = write!(self.out, r#"<table style="{TABLE_STYLE}">"#);
        if !head.is_empty() {
            self.out.push_str("<thead><tr>");
            for (column, cell) in head.iter().enumerate() {
                let align = alignment(alignments.get(column)).unwrap_or("left");
                let _ = write!(
                    self.out,
                    r#"<th style="background-color: #F4F5F7; {CELL_STYLE} text-align: {align}; font-weight: 600;">"#
                );
                self.inlines(cell);
                self.out.push_str("</th>");
            }
            self.out.push_str("</tr></thead>");
        }
        self.out.push_str("<tbody>");
        for row in rows {
            self.out.push_str("<tr>");
            for (column, cell) in row.iter().enumerate() {
                match alignment(alignments.get(column)) {
                    Some(align) => {
                        let _ = write!(self.out, r#"<td style="{CELL_STYLE} text-align: {align};">"#);
                    }
                    None => {
                        let _ = write!(self.out, r#"<td style="{CELL_STYLE}">"#);
                    }
                }
                self.inlines(cell);
                self.out.push_str("</td>");
            }
            self.out.push_str("</tr>");
        }
        self.out.push_str("</tbody></table>");
    }

    fn inlines(&mut self, inlines: &[Inline]) {
        for inline in inlines {
            self.inline(inline);
        }
    }

    fn inline(&mut self, inline: &Inline) {
        match inline {
            Inline::Text(text) => push_escaped(&mut self.out, text),
            Inline::Code(code) => {
                self.out.push_str("<code>");
                push_escaped(&mut self.out, code);
                self.out.push_str("</code>");
            }
            Inline::Emphasis(content) => self.wrapped("em", content),
            Inline::Strong(content) => self.wrapped("strong", content),
            Inline::Strikethrough(content) => self.wrapped("s", content),
            Inline::Link {
                dest,
                title,
                content,
            } => {
                self.out.push_str("<a href=\"");
                push_escaped(&mut self.out, dest);
                if !title.is_empty() {
                    self.out.push_str("\" title=\"");
                    push_escaped(&mut self.out, title);
                }
                self.out.push_str("\">");
                self.inlines(content);
                self.out.push_str("</a>");
            }
            Inline::Image { dest, title, alt } => {
                self.out.push_str("<ac:image ac:alt=\"");
                push_escaped(&mut self.out, alt);
                if !title.is_empty() {
                    self.out.push_str("\" ac:title=\"");
                    push_escaped(&mut self.out, title);
                }
                self.out.push_str("\"><ri:url ri:value=\"");
                push_escaped(&mut self.out, dest);
                self.out.push_str("\" /></ac:image>");
            }
            Inline::LineBreak => self.out.push_str("<br />"),
            Inline::Html(html) => self.out.push_str(html),
            Inline::TaskMarker(checked) => self.out.push_str(if *checked { "☑ " } else { "☐ " }),
        }
    }

    fn wrapped(&mut self, tag: &str, content: &[Inline]) {
        let _ = write!(self.out, "<{tag}>");
        self.inlines(content);
        let _ = write!(self.out, "</{tag}>");
    }
}

fn alignment(alignment: Option<&Alignment>) -> Option<&'static str> {
    match alignment? {
        Alignment::None => None,
        Alignment::Left => Some("left"),
        Alignment::Center => Some("center"),
        Alignment::Right => Some("right"),
    }
}
