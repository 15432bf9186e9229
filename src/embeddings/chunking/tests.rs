use super::estimate_token_count as estimate_token_count_impl;
use super::*;
use std::path::PathBuf;

fn create_test_document(content: &str) -> Document {
    Document {
        content: content.to_string(),
        metadata: DocumentMetadata {
            source: PathBuf::from("knowledge-base/company/about.md"),
            category: "company".to_string(),
        },
    }
}

fn config(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
    ChunkingConfig {
        chunk_size,
        chunk_overlap,
    }
}

/// Rebuild the original text from the non-overlapping part of each window
fn reconstruct(chunks: &[ContentChunk]) -> String {
    let mut text = String::new();
    let mut covered = 0;
    for chunk in chunks {
        let skip = covered - chunk.offset;
        text.extend(chunk.content.chars().skip(skip));
        covered = chunk.offset + chunk.char_len();
    }
    text
}

#[test]
fn estimate_token_count() {
    assert_eq!(estimate_token_count_impl("hello world"), 2);
    assert_eq!(estimate_token_count_impl("This is a test."), 5);
    assert_eq!(estimate_token_count_impl(""), 0);
}

#[test]
fn default_sizes() {
    let config = ChunkingConfig::default();
    assert_eq!(config.chunk_size, 500);
    assert_eq!(config.chunk_overlap, 200);
    assert_eq!(config.step().expect("default config is valid"), 300);
}

#[test]
fn short_document_is_single_chunk() {
    let document = create_test_document("Insurellm offers auto insurance.");
    let chunks = chunk_document(&document, &ChunkingConfig::default()).expect("should chunk");

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, document.content);
    assert_eq!(chunks[0].offset, 0);
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[0].metadata.category, "company");
}

#[test]
fn empty_document_has_no_chunks() {
    let chunks = chunk_document(&create_test_document(""), &ChunkingConfig::default())
        .expect("should chunk");
    assert!(chunks.is_empty());
}

#[test]
fn windows_overlap_by_configured_amount() {
    let text: String = ('a'..='z').cycle().take(1000).collect();
    let chunks = chunk_document(&create_test_document(&text), &config(500, 200))
        .expect("should chunk");

    let offsets: Vec<usize> = chunks.iter().map(|c| c.offset).collect();
    assert_eq!(offsets, vec![0, 300, 600]);
    assert_eq!(chunks.last().map(ContentChunk::char_len), Some(400));

    for pair in chunks.windows(2) {
        let previous_end = pair[0].offset + pair[0].char_len();
        assert_eq!(previous_end - pair[1].offset, 200);
        let tail: String = pair[0].content.chars().skip(300).collect();
        let head: String = pair[1].content.chars().take(200).collect();
        assert_eq!(tail, head);
    }
}

#[test]
fn chunks_never_exceed_chunk_size() {
    let text = "Insurellm was founded in 2015. ".repeat(97);
    for (size, overlap) in [(500, 200), (100, 0), (64, 63), (7, 3)] {
        let chunks = chunk_document(&create_test_document(&text), &config(size, overlap))
            .expect("should chunk");
        assert!(chunks.iter().all(|c| c.char_len() <= size));
        assert!(chunks.iter().all(|c| !c.content.is_empty()));
    }
}

#[test]
fn chunking_is_lossless() {
    let texts = [
        "short".to_string(),
        "x".repeat(500),
        "y".repeat(501),
        "Carllm, Homellm and Rellm are Insurellm products.\n\n".repeat(40),
    ];

    for text in &texts {
        for (size, overlap) in [(500, 200), (50, 10), (13, 12), (1, 0)] {
            let chunks = chunk_document(&create_test_document(text), &config(size, overlap))
                .expect("should chunk");
            assert_eq!(&reconstruct(&chunks), text, "size {size}, overlap {overlap}");
        }
    }
}

#[test]
fn multibyte_text_is_split_on_char_boundaries() {
    let text = "Größe für Versicherung – ünd €uro ✓ ".repeat(30);
    let chunks =
        chunk_document(&create_test_document(&text), &config(37, 11)).expect("should chunk");

    assert!(chunks.len() > 1);
    assert!(chunks.iter().all(|c| c.char_len() <= 37));
    assert_eq!(reconstruct(&chunks), text);
}

#[test]
fn chunk_indices_are_sequential_per_document() {
    let documents = vec![
        create_test_document(&"a".repeat(900)),
        create_test_document(&"b".repeat(400)),
    ];
    let chunks = chunk_documents(&documents, &ChunkingConfig::default()).expect("should chunk");

    let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 0]);
}

#[test]
fn invalid_overlap_is_rejected() {
    let document = create_test_document("some text");
    assert!(chunk_document(&document, &config(100, 100)).is_err());
    assert!(chunk_document(&document, &config(100, 150)).is_err());
    assert!(chunk_document(&document, &config(0, 0)).is_err());
}
