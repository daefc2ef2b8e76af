//! Plain-text paragraph extraction.
//!
//! A document is split on blank lines. Paragraphs with at least
//! [`MIN_TEXT_LENGTH`] characters become translation units; shorter ones
//! (headings, separators, list bullets) are carried through untouched.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::job::{TranslationUnit, UnitId};

pub const MIN_TEXT_LENGTH: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Translatable(TranslationUnit),
    Passthrough(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    blocks: Vec<Block>,
}

impl Document {
    pub fn parse(text: &str) -> Self {
        let mut taken = HashSet::new();
        let blocks = split_paragraphs(text)
            .into_iter()
            .map(|para| {
                if para.chars().count() < MIN_TEXT_LENGTH {
                    Block::Passthrough(para)
                } else {
                    let id = unique_unit_id(&mut taken, new_unit_id);
                    Block::Translatable(TranslationUnit::new(id, para))
                }
            })
            .collect();
        Self { blocks }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn units(&self) -> Vec<TranslationUnit> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Translatable(unit) => Some(unit.clone()),
                Block::Passthrough(_) => None,
            })
            .collect()
    }

    /// Reassemble the document, substituting translations by unit id.
    /// Units with no translation keep their source text.
    pub fn render(&self, translations: &HashMap<UnitId, String>) -> String {
        self.blocks
            .iter()
            .map(|b| match b {
                Block::Translatable(unit) => translations
                    .get(&unit.id)
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .unwrap_or(unit.text.as_str()),
                Block::Passthrough(text) => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Units for every paragraph long enough to translate.
pub fn paragraphs(text: &str) -> Vec<TranslationUnit> {
    Document::parse(text).units()
}

fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs
}

fn new_unit_id() -> UnitId {
    let id = Uuid::new_v4().simple().to_string();
    UnitId::new(format!("para-{}", &id[..8]))
}

/// Draw ids until one is not yet used in this document. Short ids can
/// collide, and a duplicate would let one translation overwrite another.
fn unique_unit_id(taken: &mut HashSet<UnitId>, mut draw: impl FnMut() -> UnitId) -> UnitId {
    loop {
        let id = draw();
        if taken.insert(id.clone()) {
            return id;
        }
    }
}
