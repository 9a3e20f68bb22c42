//! Byte-level BPE vocabulary.
//!
//! Token id layout:
//! - `0..256`: one token per raw byte (so every input is representable)
//! - `256..256 + merges.len()`: merged tokens, in merge-rank order
//! - then the control tokens, in the order listed in [`VocabSpec::special`]

use std::collections::{BTreeMap, HashMap, HashSet};

use llama_engine::{PieceOutcome, TokenId, TokenizeOutcome, Vocabulary};
use serde::{Deserialize, Serialize};

use crate::chat::special_tokens;
use crate::{TokenizerError, TokenizerResult};

const BYTE_TOKENS: usize = 256;

/// Serializable description of a vocabulary, stored alongside model weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabSpec {
    /// BPE merges in rank order; merge `i` creates token `256 + i`.
    pub merges: Vec<(TokenId, TokenId)>,

    /// Control token strings.
    pub special: Vec<String>,

    /// Control token used as beginning-of-sequence marker.
    #[serde(default)]
    pub bos: Option<String>,

    /// Control tokens that end generation.
    #[serde(default)]
    pub eog: Vec<String>,

    /// Whether `add_special` tokenization prepends `bos`.
    #[serde(default = "default_add_bos")]
    pub add_bos: bool,
}

fn default_add_bos() -> bool {
    true
}

impl VocabSpec {
    /// Byte-level vocabulary with the Llama 3 control tokens and the given merges.
    pub fn llama3(merges: Vec<(TokenId, TokenId)>) -> Self {
        Self {
            merges,
            special: vec![
                special_tokens::BOS.to_string(),
                special_tokens::EOS.to_string(),
                special_tokens::START_HEADER.to_string(),
                special_tokens::END_HEADER.to_string(),
                special_tokens::EOT.to_string(),
            ],
            bos: Some(special_tokens::BOS.to_string()),
            eog: vec![special_tokens::EOS.to_string(), special_tokens::EOT.to_string()],
            add_bos: true,
        }
    }

    /// Learn `n_merges` BPE merges from `corpus`.
    ///
    /// Each round merges the most frequent adjacent pair; ties go to the
    /// smallest pair so the result is deterministic.
    pub fn learn_merges(corpus: &str, n_merges: usize) -> Vec<(TokenId, TokenId)> {
        let mut words: Vec<Vec<TokenId>> = corpus
            .split_inclusive(' ')
            .map(|w| w.bytes().map(TokenId::from).collect())
            .collect();
        let mut merges = Vec::with_capacity(n_merges);

        for rank in 0..n_merges {
            let mut counts: BTreeMap<(TokenId, TokenId), usize> = BTreeMap::new();
            for word in &words {
                for pair in word.windows(2) {
                    *counts.entry((pair[0], pair[1])).or_default() += 1;
                }
            }
            let Some((&pair, _)) = counts
                .iter()
                .filter(|(_, count)| **count > 1)
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            else {
                break;
            };

            let new_id = (BYTE_TOKENS + rank) as TokenId;
            for word in &mut words {
                merge_pair(word, pair, new_id);
            }
            merges.push(pair);
        }

        merges
    }
}

/// Replace every non-overlapping occurrence of `pair` in `ids` with `merged`.
fn merge_pair(ids: &mut Vec<TokenId>, pair: (TokenId, TokenId), merged: TokenId) {
    let mut out = Vec::with_capacity(ids.len());
    let mut i = 0;
    while i < ids.len() {
        if i + 1 < ids.len() && ids[i] == pair.0 && ids[i + 1] == pair.1 {
            out.push(merged);
            i += 2;
        } else {
            out.push(ids[i]);
            i += 1;
        }
    }
    *ids = out;
}

/// A loaded vocabulary.
#[derive(Debug, Clone)]
pub struct Vocab {
    /// Bytes for every non-control token.
    pieces: Vec<Vec<u8>>,
    /// (left, right) -> (rank, merged id)
    ranks: HashMap<(TokenId, TokenId), (usize, TokenId)>,
    /// Control tokens, longest first for matching.
    special_by_len: Vec<(String, TokenId)>,
    special_text: HashMap<TokenId, String>,
    bos: Option<TokenId>,
    eog: HashSet<TokenId>,
    add_bos: bool,
    spec: VocabSpec,
}

impl Vocab {
    pub fn from_spec(spec: VocabSpec) -> TokenizerResult<Self> {
        let mut pieces: Vec<Vec<u8>> = (0..=255u8).map(|b| vec![b]).collect();
        let mut ranks = HashMap::with_capacity(spec.merges.len());

        for (rank, &(left, right)) in spec.merges.iter().enumerate() {
            let known = pieces.len() as TokenId;
            if left < 0 || right < 0 || left >= known || right >= known {
                return Err(TokenizerError::InvalidVocab(format!(
                    "merge {rank} references unknown token ({left}, {right})"
                )));
            }
            let mut merged = pieces[left as usize].clone();
            merged.extend_from_slice(&pieces[right as usize]);
            let id = pieces.len() as TokenId;
            pieces.push(merged);
            ranks.insert((left, right), (rank, id));
        }

        let mut special_ids = HashMap::with_capacity(spec.special.len());
        let mut special_text = HashMap::with_capacity(spec.special.len());
        for (offset, text) in spec.special.iter().enumerate() {
            if text.is_empty() {
                return Err(TokenizerError::InvalidVocab("empty control token".into()));
            }
            let id = (pieces.len() + offset) as TokenId;
            if special_ids.insert(text.clone(), id).is_some() {
                return Err(TokenizerError::InvalidVocab(format!(
                    "duplicate control token {text}"
                )));
            }
            special_text.insert(id, text.clone());
        }

        let lookup = |name: &String| {
            special_ids
                .get(name)
                .copied()
                .ok_or_else(|| TokenizerError::InvalidVocab(format!("unknown control token {name}")))
        };
        let bos = spec.bos.as_ref().map(lookup).transpose()?;
        let eog = spec.eog.iter().map(lookup).collect::<TokenizerResult<HashSet<_>>>()?;

        let mut special_by_len: Vec<(String, TokenId)> = special_ids.into_iter().collect();
        special_by_len.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.1.cmp(&b.1)));

        Ok(Self {
            pieces,
            ranks,
            special_by_len,
            special_text,
            bos,
            eog,
            add_bos: spec.add_bos,
            spec,
        })
    }

    pub fn spec(&self) -> &VocabSpec {
        &self.spec
    }

    /// Id of a control token by its text.
    pub fn special_id(&self, text: &str) -> Option<TokenId> {
        self.special_by_len
            .iter()
            .find(|(t, _)| t == text)
            .map(|&(_, id)| id)
    }

    /// Tokenize into a fresh vector.
    pub fn encode(&self, text: &str, add_special: bool, parse_special: bool) -> Vec<TokenId> {
        let mut ids = Vec::with_capacity(text.len() + 1);

        if parse_special && !self.special_by_len.is_empty() {
            let mut rest = text;
            while let Some((at, special, id)) = self.next_special(rest) {
                self.encode_bytes(rest[..at].as_bytes(), &mut ids);
                ids.push(id);
                rest = &rest[at + special.len()..];
            }
            self.encode_bytes(rest.as_bytes(), &mut ids);
        } else {
            self.encode_bytes(text.as_bytes(), &mut ids);
        }

        if add_special && self.add_bos {
            if let Some(bos) = self.bos {
                if ids.first() != Some(&bos) {
                    ids.insert(0, bos);
                }
            }
        }

        ids
    }

    /// Concatenated piece bytes of `tokens`.
    pub fn detokenize(&self, tokens: &[TokenId], render_special: bool) -> TokenizerResult<Vec<u8>> {
        let mut out = Vec::new();
        for &token in tokens {
            match self.piece_bytes(token, render_special) {
                Some(bytes) => out.extend_from_slice(bytes),
                None => return Err(TokenizerError::InvalidToken(token)),
            }
        }
        Ok(out)
    }

    /// Earliest control token in `text`; longest wins at equal offsets.
    fn next_special<'a>(&'a self, text: &str) -> Option<(usize, &'a str, TokenId)> {
        let mut best: Option<(usize, &str, TokenId)> = None;
        for (special, id) in &self.special_by_len {
            if let Some(at) = text.find(special.as_str()) {
                if best.map_or(true, |(b, _, _)| at < b) {
                    best = Some((at, special.as_str(), *id));
                }
            }
        }
        best
    }

    /// Byte tokens, then lowest-rank merges until none apply.
    fn encode_bytes(&self, bytes: &[u8], out: &mut Vec<TokenId>) {
        if bytes.is_empty() {
            return;
        }
        let mut ids: Vec<TokenId> = bytes.iter().map(|&b| TokenId::from(b)).collect();

        loop {
            let best = ids
                .windows(2)
                .filter_map(|w| self.ranks.get(&(w[0], w[1])).map(|&(rank, id)| (rank, (w[0], w[1]), id)))
                .min_by_key(|&(rank, _, _)| rank);
            match best {
                Some((_, pair, merged)) => merge_pair(&mut ids, pair, merged),
                None => break,
            }
        }

        out.extend(ids);
    }

    fn piece_bytes(&self, token: TokenId, render_special: bool) -> Option<&[u8]> {
        if token < 0 {
            return None;
        }
        if let Some(piece) = self.pieces.get(token as usize) {
            return Some(piece);
        }
        self.special_text.get(&token).map(|text| {
            if render_special {
                text.as_bytes()
            } else {
                &[][..]
            }
        })
    }
}

impl Vocabulary for Vocab {
    fn n_tokens(&self) -> usize {
        self.pieces.len() + self.special_text.len()
    }

    fn tokenize_into(
        &self,
        text: &str,
        out: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> TokenizeOutcome {
        let ids = self.encode(text, add_special, parse_special);
        if ids.len() > out.len() {
            return TokenizeOutcome::Insufficient {
                required: ids.len(),
            };
        }
        out[..ids.len()].copy_from_slice(&ids);
        TokenizeOutcome::Written(ids.len())
    }

    fn token_to_piece(&self, token: TokenId, out: &mut [u8], render_special: bool) -> PieceOutcome {
        let bytes = self.piece_bytes(token, render_special).unwrap_or(&[]);
        if bytes.len() > out.len() {
            return PieceOutcome::Insufficient {
                required: bytes.len(),
            };
        }
        out[..bytes.len()].copy_from_slice(bytes);
        PieceOutcome::Written(bytes.len())
    }

    fn is_eog(&self, token: TokenId) -> bool {
        self.eog.contains(&token)
    }

    fn bos(&self) -> Option<TokenId> {
        self.bos
    }
}
