use std::collections::HashMap;

use crate::error::{CtcError, Result};

/// Class index produced by the acoustic model.
pub type Label = u32;

/// Bidirectional mapping between alphabet characters and class indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
    /// Character for each class index
    chars: Vec<char>,
    /// Reverse map
    index: HashMap<char, Label>,
    /// Index of the CTC blank class
    blank: Label,
    /// Index of the word separator class
    space: Label,
}

impl Labels {
    /// Build from an ordered alphabet, one character per class (the blank
    /// class included, at `blank`).
    pub fn new(alphabet: &str, blank: Label, space: Label) -> Result<Self> {
        let chars: Vec<char> = alphabet.chars().collect();
        let n = chars.len();
        if n == 0 {
            return Err(CtcError::invalid_config("empty alphabet"));
        }
        if blank as usize >= n || space as usize >= n {
            return Err(CtcError::invalid_config(format!(
                "blank {} / space {} out of range for {} labels",
                blank, space, n
            )));
        }
        if blank == space {
            return Err(CtcError::invalid_config("blank and space must differ"));
        }
        let mut index = HashMap::with_capacity(n);
        for (i, &c) in chars.iter().enumerate() {
            if index.insert(c, i as Label).is_some() {
                return Err(CtcError::invalid_config(format!(
                    "character {:?} appears twice in the alphabet",
                    c
                )));
            }
        }
        Ok(Self {
            chars,
            index,
            blank,
            space,
        })
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn blank(&self) -> Label {
        self.blank
    }

    pub fn space(&self) -> Label {
        self.space
    }

    pub fn is_blank(&self, label: Label) -> bool {
        label == self.blank
    }

    pub fn is_space(&self, label: Label) -> bool {
        label == self.space
    }

    pub fn label_of(&self, c: char) -> Result<Label> {
        self.index
            .get(&c)
            .copied()
            .ok_or(CtcError::UnknownSymbol { symbol: c })
    }

    /// Character for `label`, `None` only outside `[0, len)`.
    pub fn char_of(&self, label: Label) -> Option<char> {
        self.chars.get(label as usize).copied()
    }

    /// Label sequence for a word.
    pub fn encode(&self, text: &str) -> Result<Vec<Label>> {
        text.chars().map(|c| self.label_of(c)).collect()
    }

    /// Text for a decoded label sequence. Blanks and unknown labels are
    /// dropped.
    pub fn decode(&self, labels: &[Label]) -> String {
        labels
            .iter()
            .filter(|&&l| !self.is_blank(l))
            .filter_map(|&l| self.char_of(l))
            .collect()
    }
}
