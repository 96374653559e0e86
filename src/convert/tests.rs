// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-ConfluenceMcp-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Confluence MCP and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

use super::*;

use std::sync::Mutex;

use async_trait::async_trait;
use rstest::rstest;

use crate::render::DiagramError;

/// Records every source it is asked to render; fails sources containing `FAIL`.
#[derive(Default)]
struct RecordingRenderer {
    calls: Mutex<Vec<String>>,
}

impl RecordingRenderer {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl DiagramRenderer for RecordingRenderer {
    async fn render(&self, source: &str, _: &RenderOptions) -> Result<Vec<u8>, DiagramError> {
        self.calls.lock().expect("lock").push(source.to_owned());
        if source.contains("FAIL") {
            return Err(DiagramError::Rejected {
                message: "Parse error on line 1".to_owned(),
            });
        }
        Ok(format!("png:{source}").into_bytes())
    }
}

fn converter() -> (Arc<RecordingRenderer>, Converter) {
    let renderer = Arc::new(RecordingRenderer::default());
    let converter = Converter::new(renderer.clone());
    (renderer, converter)
}

const LAYOUT_OPEN: &str =
    r#"<ac:layout><ac:layout-section ac:type="single"><ac:layout-cell><div style="margin: 20px 0;">"#;
const LAYOUT_CLOSE: &str = "</div></ac:layout-cell></ac:layout-section></ac:layout>";

#[tokio::test]
async fn empty_input_yields_an_empty_wrapped_document() {
    let (renderer, converter) = converter();
    let page = converter.convert("").await.expect("convert");
    assert_eq!(page.storage, format!("{LAYOUT_OPEN}{LAYOUT_CLOSE}"));
    assert!(page.diagrams.is_empty());
    assert!(renderer.calls().is_empty());
}

#[tokio::test]
async fn diagrams_render_once_each_in_document_order() {
    let (renderer, converter) = converter();
    let markdown = "\
# Architecture

```mermaid
graph TD; A-->B
```

Between.

```mermaid
sequenceDiagram
  A->>B: hi
```

```mermaid
```
";
    let page = converter.convert(markdown).await.expect("convert");

    assert_eq!(
        renderer.calls(),
        vec![
            "graph TD; A-->B".to_owned(),
            "sequenceDiagram\n  A->>B: hi".to_owned(),
            String::new(),
        ]
    );
    let filenames = page.diagrams.iter().map(|d| d.filename.as_str()).collect::<Vec<_>>();
    assert_eq!(filenames, vec!["diagram-1.png", "diagram-2.png", "diagram-3.png"]);
    assert_eq!(page.diagrams[0].png, b"png:graph TD; A-->B".to_vec());

    for n in 1..=3 {
        assert!(page.storage.contains(&format!("📊 Diagram {n}")));
        assert!(page.storage.contains(&format!(r#"ri:filename="diagram-{n}.png""#)));
    }
    assert!(!page.storage.contains("mermaid"));
    assert!(page.storage.find("📊 Diagram 1") < page.storage.find("Between."));
}

#[tokio::test]
async fn failing_diagram_degrades_to_a_warning_in_place() {
    let (_, converter) = converter();
    let markdown = "before\n\n```mermaid\nFAIL\n```\n\nafter\n\n```mermaid\ngraph LR; X-->Y\n```\n";
    let page = converter.convert(markdown).await.expect("convert");

    assert!(page.storage.contains(
        "⚠️ Failed to render diagram 1: mermaid rejected the diagram: Parse error on line 1"
    ));
    assert!(page.storage.contains("📊 Diagram 2"));
    assert!(!page.storage.contains("📊 Diagram 1"));
    assert_eq!(page.diagrams.len(), 1);
    assert_eq!(page.diagrams[0].filename, "diagram-2.png");

    let before = page.storage.find("before").expect("before");
    let warning = page.storage.find("⚠️").expect("warning");
    let after = page.storage.find("after").expect("after");
    assert!(before < warning && warning < after);
}

#[tokio::test]
async fn placeholder_like_text_is_left_alone() {
    let (renderer, converter) = converter();
    let page = converter
        .convert("Literal {{mermaid-placeholder-0}} text\n")
        .await
        .expect("convert");
    assert!(page.storage.contains("Literal {{mermaid-placeholder-0}} text"));
    assert!(renderer.calls().is_empty());
}

#[tokio::test]
async fn styling_rules_apply_to_each_node_kind() {
    let (_, converter) = converter();
    let markdown = "\
[TOC]

## Title

Body with **bold**, *em*, `code` and [link](https://example.com?a=1&b=2).

- one
- two

1. first

> quoted

> **Info:** heads up

> **Tip:** try this

---

[TOC]
";
    let page = converter.convert(markdown).await.expect("convert");
    let s = &page.storage;

    assert!(s.starts_with(LAYOUT_OPEN));
    assert!(s.ends_with(LAYOUT_CLOSE));
    assert_eq!(s.matches(r#"<ac:structured-macro ac:name="toc">"#).count(), 1);
    assert!(s.contains(r#"<ac:parameter ac:name="printable">true</ac:parameter>"#));
    assert!(s.contains("<h2>Title</h2>"));
    assert!(s.contains(r#"<p style="margin: 12px 0; line-height: 1.6;">Body with <strong>bold</strong>, <em>em</em>, <code>code</code> and <a href="https://example.com?a=1&amp;b=2">link</a>.</p>"#));
    assert!(s.contains(r#"<ul style="margin: 12px 0; padding-left: 24px;"><li style="margin: 4px 0;">one</li>"#));
    assert!(s.contains(r#"<ol style="margin: 12px 0; padding-left: 24px;">"#));
    assert!(s.contains(r#"<ac:structured-macro ac:name="quote"><ac:rich-text-body><p style="margin: 12px 0; line-height: 1.6;">quoted</p>"#));
    assert!(s.contains(r#"<ac:structured-macro ac:name="info"><ac:rich-text-body><p style="margin: 12px 0; line-height: 1.6;">heads up</p>"#));
    assert!(s.contains(r#"<ac:structured-macro ac:name="tip">"#));
    assert!(s.contains(r#"<hr style="border: none; border-top: 1px solid #DFE1E6; margin: 24px 0;" />"#));
    assert!(!s.contains("[TOC]"));
    assert!(!s.contains("Info:"));
}

#[tokio::test]
async fn code_with_cdata_terminator_stays_well_formed() {
    let (_, converter) = converter();
    let page = converter
        .convert("```xml\n<a><![CDATA[x]]></a>\n```\n")
        .await
        .expect("convert");
    assert!(page
        .storage
        .contains("<![CDATA[<a><![CDATA[x]]]]><![CDATA[></a>]]>"));
}

#[rstest]
#[case("bell \u{7} here", 0x7, 1)]
#[case("ok\nnull \u{0}", 0x0, 2)]
#[case("a\nb\nform\u{C}feed", 0xC, 3)]
#[case("\u{FFFF}", 0xFFFF, 1)]
fn disallowed_characters_fail_validation(#[case] input: &str, #[case] code: u32, #[case] line: usize) {
    assert_eq!(validate(input), Err(ConvertError::InvalidCharacter { code, line }));
}

#[rstest]
#[case("tabs\tand\r\nnewlines")]
#[case("unicode ✓ 📊 ü")]
#[case("")]
fn allowed_text_passes_validation(#[case] input: &str) {
    assert_eq!(validate(input), Ok(()));
}

#[tokio::test]
async fn oversized_input_is_rejected_without_rendering() {
    let (renderer, converter) = converter();
    let markdown = format!("```mermaid\ngraph\n```\n{}", "x".repeat(MAX_INPUT_BYTES));
    let err = converter.convert(&markdown).await.unwrap_err();
    assert!(matches!(err, ConvertError::TooLarge { .. }));
    assert!(renderer.calls().is_empty());
}
