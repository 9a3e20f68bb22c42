//! Tokenizer tests: roundtrip, two-phase buffer protocol, and streaming.
//!
//! `detokenize(tokenize(x)) == x` must hold for every input, including
//! multi-byte text and control-token markup.

use llama_engine::{PieceOutcome, TokenId, TokenizeOutcome, Vocabulary};
use llama_tokenizer::*;

fn trained_vocab() -> Vocab {
    let corpus = "the quick brown fox jumps over the lazy dog. le renard brun rapide saute par-dessus le chien paresseux.";
    Vocab::from_spec(VocabSpec::llama3(VocabSpec::learn_merges(corpus, 40))).unwrap()
}

// ===== Section A: Roundtrip =====

#[test]
fn roundtrip_ascii_and_unicode() {
    let vocab = trained_vocab();
    let cases = [
        "",
        "hello world",
        "  leading and trailing  ",
        "tabs\tand\nnewlines",
        "café crème brûlée",
        "日本語のテキスト",
        "emoji 🦀 and 👋🏽",
    ];
    for text in cases {
        let ids = tokenize(&vocab, text, false, false).unwrap();
        let bytes = vocab.detokenize(&ids, true).unwrap();
        assert_eq!(bytes, text.as_bytes(), "roundtrip failed for {text:?}");
    }
}

#[test]
fn roundtrip_with_control_markup() {
    let vocab = trained_vocab();
    let prompt = PromptTemplate::default().format("The cat sleeps.");
    let ids = tokenize(&vocab, &prompt, true, true).unwrap();

    // BOS comes from the template, not from add_special.
    let bos = vocab.bos().unwrap();
    assert_eq!(ids[0], bos);
    assert_eq!(ids.iter().filter(|&&t| t == bos).count(), 1);

    let bytes = vocab.detokenize(&ids, true).unwrap();
    assert_eq!(bytes, prompt.as_bytes());
}

#[test]
fn hidden_control_tokens_render_nothing() {
    let vocab = trained_vocab();
    let ids = tokenize(&vocab, "a<|eot_id|>b", false, true).unwrap();
    assert_eq!(vocab.detokenize(&ids, false).unwrap(), b"ab");
}

#[test]
fn detokenize_rejects_unknown_id() {
    let vocab = trained_vocab();
    let err = vocab.detokenize(&[97, 1_000_000], true).unwrap_err();
    assert_eq!(err, TokenizerError::InvalidToken(1_000_000));
}

// ===== Section B: Two-phase protocol =====

/// Emits three ids per input byte, so the first-pass estimate is too small.
struct ExpandingVocab {
    calls: std::sync::atomic::AtomicUsize,
}

impl Vocabulary for ExpandingVocab {
    fn n_tokens(&self) -> usize {
        256
    }

    fn tokenize_into(
        &self,
        text: &str,
        out: &mut [TokenId],
        _add_special: bool,
        _parse_special: bool,
    ) -> TokenizeOutcome {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let required = text.len() * 3;
        if required > out.len() {
            return TokenizeOutcome::Insufficient { required };
        }
        for (i, b) in text.bytes().enumerate() {
            out[i * 3..i * 3 + 3].fill(TokenId::from(b));
        }
        TokenizeOutcome::Written(required)
    }

    fn token_to_piece(&self, _token: TokenId, _out: &mut [u8], _render_special: bool) -> PieceOutcome {
        PieceOutcome::Written(0)
    }

    fn is_eog(&self, _token: TokenId) -> bool {
        false
    }

    fn bos(&self) -> Option<TokenId> {
        None
    }
}

#[test]
fn undersized_first_pass_is_resized_and_retried() {
    let vocab = ExpandingVocab {
        calls: Default::default(),
    };
    let text = "x".repeat(40);
    let ids = tokenize(&vocab, &text, false, false).unwrap();
    assert_eq!(ids.len(), 120);
    assert!(ids.iter().all(|&t| t == TokenId::from(b'x')));
    assert_eq!(vocab.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[test]
fn short_text_fits_in_slack() {
    let vocab = ExpandingVocab {
        calls: Default::default(),
    };
    let ids = tokenize(&vocab, "ab", false, false).unwrap();
    assert_eq!(ids.len(), 6);
    assert_eq!(vocab.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

// ===== Section C: Streaming =====

#[test]
fn streaming_pieces_reassemble_multibyte_text() {
    // No merges: every byte is its own token, so multi-byte characters
    // arrive split across pieces.
    let vocab = Vocab::from_spec(VocabSpec::llama3(vec![])).unwrap();
    let text = "né 🦀!";
    let ids = tokenize(&vocab, text, false, false).unwrap();

    let mut pieces = PieceBuffer::default();
    let mut stream = Utf8Stream::new();
    let mut fragments = Vec::new();
    for id in ids {
        let piece = pieces.render(&vocab, id, true).unwrap();
        let out = stream.push(piece.bytes);
        if !out.is_empty() {
            fragments.push(out);
        }
    }

    assert_eq!(fragments.concat(), text);
    assert!(fragments.iter().all(|f| !f.contains('\u{FFFD}')));
    assert_eq!(stream.finish(), 0);
}
