// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! Typed document tree built from Markdown events.

use pulldown_cmark::{Alignment, CodeBlockKind, Event, Options, Parser, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalloutKind {
    Info,
    Warning,
    Tip,
}

impl CalloutKind {
    pub fn macro_name(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Tip => "tip",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Info:" => Some(Self::Info),
            "Warning:" => Some(Self::Warning),
            "Tip:" => Some(Self::Tip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading {
        level: u8,
        content: Vec<Inline>,
    },
    Paragraph(Vec<Inline>),
    /// Inline content directly inside a tight list item.
    Plain(Vec<Inline>),
    CodeBlock {
        language: Option<String>,
        code: String,
    },
    Quote(Vec<Block>),
    Callout {
        kind: CalloutKind,
        body: Vec<Block>,
    },
    List {
        start: Option<u64>,
        items: Vec<Vec<Block>>,
    },
    Table {
        alignments: Vec<Alignment>,
        head: Vec<Vec<Inline>>,
        rows: Vec<Vec<Vec<Inline>>>,
    },
    Rule,
    Html(String),
    TocMarker,
    /// Stands in for the fenced `mermaid` block at this 0-based index until rendering resolves it.
    DiagramPlaceholder(usize),
    /// 1-based diagram number; the PNG is attached as `diagram-{number}.png`.
    DiagramImage {
        number: usize,
    },
    DiagramWarning {
        number: usize,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    Text(String),
    Code(String),
    Emphasis(Vec<Inline>),
    Strong(Vec<Inline>),
    Strikethrough(Vec<Inline>),
    Link {
        dest: String,
        title: String,
        content: Vec<Inline>,
    },
    Image {
        dest: String,
        title: String,
        alt: String,
    },
    LineBreak,
    Html(String),
    TaskMarker(bool),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub blocks: Vec<Block>,
    /// Mermaid sources in document order; `DiagramPlaceholder(i)` refers to `diagrams[i]`.
    pub diagrams: Vec<String>,
}

/// Outcome of rendering one extracted diagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagramOutcome {
    Rendered,
    Failed(String),
}

pub fn parse(markdown: &str) -> Document {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut builder = TreeBuilder {
        events: Parser::new_ext(markdown, options),
        diagrams: Vec::new(),
    };
    let blocks = builder.blocks();
    Document {
        blocks,
        diagrams: builder.diagrams,
    }
}

struct TreeBuilder<'a, I: Iterator<Item = Event<'a>>> {
    events: I,
    diagrams: Vec<String>,
}

fn is_inline_tag(tag: &Tag<'_>) -> bool {
    matches!(
        tag,
        Tag::Emphasis | Tag::Strong | Tag::Strikethrough | Tag::Link { .. } | Tag::Image { .. }
    )
}

impl<'a, I: Iterator<Item = Event<'a>>> TreeBuilder<'a, I> {
    /// Block children up to the end of the enclosing container.
    fn blocks(&mut self) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut loose = Vec::new();
        while let Some(event) = self.events.next() {
            match event {
                Event::End(_) => break,
                Event::Start(tag) if !is_inline_tag(&tag) => {
                    flush_loose(&mut blocks, &mut loose);
                    self.block(tag, &mut blocks);
                }
                Event::Rule => {
                    flush_loose(&mut blocks, &mut loose);
                    blocks.push(Block::Rule);
                }
                other => self.inline_event(other, &mut loose),
            }
        }
        flush_loose(&mut blocks, &mut loose);
        blocks
    }

    fn block(&mut self, tag: Tag<'a>, out: &mut Vec<Block>) {
        match tag {
            Tag::Paragraph => out.push(Block::Paragraph(self.inlines())),
            Tag::Heading { level, .. } => out.push(Block::Heading {
                level: level as u8,
                content: self.inlines(),
            }),
            Tag::BlockQuote => out.push(Block::Quote(self.blocks())),
            Tag::CodeBlock(kind) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(ToOwned::to_owned),
                    CodeBlockKind::Indented => None,
                };
                let code = self.raw_text();
                if language.as_deref() == Some("mermaid") {
                    out.push(Block::DiagramPlaceholder(self.diagrams.len()));
                    self.diagrams.push(code.trim().to_owned());
                } else {
                    out.push(Block::CodeBlock { language, code });
                }
            }
            Tag::List(start) => out.push(self.list(start)),
            Tag::Table(alignments) => out.push(self.table(alignments)),
            Tag::HtmlBlock => out.push(Block::Html(self.raw_text())),
            // Items and table parts only appear inside their containers; anything else (footnote
            // definitions, metadata) is flattened into the parent.
            _ => out.extend(self.blocks()),
        }
    }

    fn list(&mut self, start: Option<u64>) -> Block {
        let mut items = Vec::new();
        while let Some(event) = self.events.next() {
            match event {
                Event::Start(Tag::Item) => items.push(self.blocks()),
                Event::End(_) => break,
                _ => {}
            }
        }
        Block::List { start, items }
    }

    fn table(&mut self, alignments: Vec<Alignment>) -> Block {
        let mut head = Vec::new();
        let mut rows = Vec::new();
        while let Some(event) = self.events.next() {
            match event {
                Event::Start(Tag::TableHead) => head = self.cells(),
                Event::Start(Tag::TableRow) => rows.push(self.cells()),
                Event::End(_) => break,
                _ => {}
            }
        }
        Block::Table {
            alignments,
            head,
            rows,
        }
    }

    fn cells(&mut self) -> Vec<Vec<Inline>> {
        let mut cells = Vec::new();
        while let Some(event) = self.events.next() {
            match event {
                Event::Start(Tag::TableCell) => cells.push(self.inlines()),
                Event::End(_) => break,
                _ => {}
            }
        }
        cells
    }

    fn inlines(&mut self) -> Vec<Inline> {
        let mut out = Vec::new();
        while let Some(event) = self.events.next() {
            match event {
                Event::End(_) => break,
                other => self.inline_event(other, &mut out),
            }
        }
        out
    }

    fn inline_event(&mut self, event: Event<'a>, out: &mut Vec<Inline>) {
        match event {
            Event::Text(text) => push_text(out, &text),
            Event::Code(code) => out.push(Inline::Code(code.into_string())),
            Event::SoftBreak | Event::HardBreak => out.push(Inline::LineBreak),
            Event::Html(html) | Event::InlineHtml(html) => out.push(Inline::Html(html.into_string())),
            Event::FootnoteReference(label) => push_text(out, &format!("[^{label}]")),
            Event::TaskListMarker(checked) => out.push(Inline::TaskMarker(checked)),
            Event::Rule => {}
            Event::Start(Tag::Emphasis) => out.push(Inline::Emphasis(self.inlines())),
            Event::Start(Tag::Strong) => out.push(Inline::Strong(self.inlines())),
            Event::Start(Tag::Strikethrough) => out.push(Inline::Strikethrough(self.inlines())),
            Event::Start(Tag::Link {
                dest_url, title, ..
            }) => out.push(Inline::Link {
                dest: dest_url.into_string(),
                title: title.into_string(),
                content: self.inlines(),
            }),
            Event::Start(Tag::Image {
                dest_url, title, ..
            }) => {
                let alt = plain_text(&self.inlines());
                out.push(Inline::Image {
                    dest: dest_url.into_string(),
                    title: title.into_string(),
                    alt,
                });
            }
            Event::Start(_) => out.extend(self.inlines()),
            Event::End(_) => {}
        }
    }

    /// Concatenated text of a code or HTML block.
    fn raw_text(&mut self) -> String {
        let mut text = String::new();
        while let Some(event) = self.events.next() {
            match event {
                Event::End(_) => break,
                Event::Text(chunk) | Event::Html(chunk) | Event::InlineHtml(chunk) => {
                    text.push_str(&chunk)
                }
                _ => {}
            }
        }
        text
    }
}

fn flush_loose(blocks: &mut Vec<Block>, loose: &mut Vec<Inline>) {
    if !loose.is_empty() {
        blocks.push(Block::Plain(std::mem::take(loose)));
    }
}

fn push_text(out: &mut Vec<Inline>, text: &str) {
    if let Some(Inline::Text(last)) = out.last_mut() {
        last.push_str(text);
    } else {
        out.push(Inline::Text(text.to_owned()));
    }
}

pub fn plain_text(inlines: &[Inline]) -> String {
    let mut text = String::new();
    for inline in inlines {
        match inline {
            Inline::Text(t) | Inline::Code(t) => text.push_str(t),
            Inline::Emphasis(c) | Inline::Strong(c) | Inline::Strikethrough(c) => {
                text.push_str(&plain_text(c))
            }
            Inline::Link { content, .. } => text.push_str(&plain_text(content)),
            Inline::Image { alt, .. } => text.push_str(alt),
            Inline::LineBreak => text.push(' '),
            Inline::Html(_) | Inline::TaskMarker(_) => {}
        }
    }
    text
}

/// Recognize callouts and table-of-contents markers.
pub fn annotate(blocks: &mut Vec<Block>) {
    for block in blocks.iter_mut() {
        match block {
            Block::Quote(children) => {
                annotate(children);
                if let Some(kind) = take_callout_label(children) {
                    let body = std::mem::take(children);
                    *block = Block::Callout { kind, body };
                }
            }
            Block::Paragraph(content) | Block::Plain(content) if is_toc_marker(content) => {
                *block = Block::TocMarker
            }
            Block::Callout { body, .. } => annotate(body),
            Block::List { items, .. } => items.iter_mut().for_each(annotate),
            _ => {}
        }
    }
}

fn is_toc_marker(content: &[Inline]) -> bool {
    matches!(content, [Inline::Text(text)] if text.trim() == "[TOC]")
}

/// Strip a leading bold `Info:`/`Warning:`/`Tip:` label from the first paragraph.
fn take_callout_label(children: &mut Vec<Block>) -> Option<CalloutKind> {
    let Some(Block::Paragraph(content)) = children.first_mut() else {
        return None;
    };
    let kind = match content.first() {
        Some(Inline::Strong(label)) => CalloutKind::from_label(&plain_text(label))?,
        _ => return None,
    };

    content.remove(0);
    match content.first_mut() {
        Some(Inline::Text(text)) => {
            let trimmed = text.trim_start().to_owned();
            if trimmed.is_empty() {
                content.remove(0);
            } else {
                *text = trimmed;
            }
        }
        Some(Inline::LineBreak) => {
            content.remove(0);
        }
        _ => {}
    }
    if content.is_empty() {
        children.remove(0);
    }
    Some(kind)
}

/// Replace every placeholder with the outcome of its diagram.
pub fn resolve_diagrams(blocks: &mut [Block], outcomes: &[DiagramOutcome]) {
    for block in blocks.iter_mut() {
        match block {
            Block::DiagramPlaceholder(index) => {
                let index = *index;
                let number = index + 1;
                *block = match outcomes.get(index) {
                    Some(DiagramOutcome::Rendered) => Block::DiagramImage { number },
                    Some(DiagramOutcome::Failed(message)) => Block::DiagramWarning {
                        number,
                        message: message.clone(),
                    },
                    None => Block::DiagramWarning {
                        number,
                        message: "diagram was not rendered".to_owned(),
                    },
                };
            }
            Block::Quote(children) | Block::Callout { body: children, .. } => {
                resolve_diagrams(children, outcomes)
            }
            Block::List { items, .. } => {
                for item in items.iter_mut() {
                    resolve_diagrams(item, outcomes);
                }
            }
            _ => {}
        }
    }
}
