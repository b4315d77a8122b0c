use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tempfile::NamedTempFile;

use crate::error::{CtcError, Result};
use crate::labels::Label;

/// ID of a node in the trie arena
pub type NodeId = u32;

const MAGIC: &[u8; 4] = b"CTCT";
const VERSION: u8 = 1;
/// Label stored for the root record
const ROOT_LABEL: Label = Label::MAX;

/// Vocabulary entry attached to a terminal node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrieWord {
    /// Index of the word in the language model vocabulary, or
    /// [`TrieWord::UNKNOWN_INDEX`] when the model has no entry for it.
    pub vocab_index: u32,
    /// Unigram log probability of the word. Kept in the file format for
    /// tools that rank vocabulary words; the decoder scores words with the
    /// language model context instead.
    pub unigram_score: f32,
}

impl TrieWord {
    /// `vocab_index` of words the language model does not know.
    pub const UNKNOWN_INDEX: u32 = u32::MAX;

    pub fn is_known(&self) -> bool {
        self.vocab_index != Self::UNKNOWN_INDEX
    }
}

#[derive(Debug, Clone, PartialEq)]
struct TrieNode {
    /// Label on the edge leading here.
    label: Label,
    /// Set when a word ends here.
    word: Option<TrieWord>,
    /// Children, sorted by label.
    children: Vec<NodeId>,
}

/// Prefix tree over label sequences of the vocabulary words.
///
/// Nodes live in an arena and are addressed by [`NodeId`]; the trie is
/// never mutated while decoding, so it can be shared between threads behind
/// an `Arc`. Two tries are equal when they hold the same words with the
/// same payloads, whatever order they were inserted in.
#[derive(Debug, Clone)]
pub struct Trie {
    /// Size of the label alphabet
    num_labels: u32,
    nodes: Vec<TrieNode>,
    /// Map (parent, label) pairs to child IDs.
    edges: HashMap<(NodeId, Label), NodeId>,
    num_words: usize,
}

impl Trie {
    pub const ROOT: NodeId = 0;

    pub fn new(num_labels: usize) -> Result<Self> {
        let num_labels = u32::try_from(num_labels)
            .map_err(|_| CtcError::invalid_config(format!("{} labels do not fit the trie format", num_labels)))?;
        Ok(Self::with_labels(num_labels))
    }

    fn with_labels(num_labels: u32) -> Self {
        Self {
            num_labels,
            nodes: vec![TrieNode {
                label: ROOT_LABEL,
                word: None,
                children: Vec::new(),
            }],
            edges: HashMap::new(),
            num_words: 0,
        }
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels as usize
    }

    pub fn num_words(&self) -> usize {
        self.num_words
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Add a word. Inserting the same label sequence twice is an error and
    /// leaves the trie untouched.
    pub fn insert(&mut self, word: &[Label], vocab_index: u32, unigram_score: f32) -> Result<NodeId> {
        if word.is_empty() {
            return Err(CtcError::invalid_config("cannot insert an empty word"));
        }
        if let Some(&label) = word.iter().find(|&&l| l >= self.num_labels) {
            return Err(CtcError::invalid_config(format!(
                "label {} out of range for {} labels",
                label, self.num_labels
            )));
        }
        if let Some(node) = self.find(word) {
            if self.is_terminal(node) {
                return Err(CtcError::DuplicateWord {
                    word: word.to_vec(),
                });
            }
        }
        let mut node = Self::ROOT;
        for &label in word {
            node = match self.lookup_child(node, label) {
                Some(child) => child,
                None => self.add_node(node, label),
            };
        }
        self.nodes[node as usize].word = Some(TrieWord {
            vocab_index,
            unigram_score,
        });
        self.num_words += 1;
        Ok(node)
    }

    fn add_node(&mut self, parent: NodeId, label: Label) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(TrieNode {
            label,
            word: None,
            children: Vec::new(),
        });
        let pos = self.nodes[parent as usize]
            .children
            .partition_point(|&c| self.nodes[c as usize].label < label);
        self.nodes[parent as usize].children.insert(pos, id);
        self.edges.insert((parent, label), id);
        id
    }

    /// Child of `node` reached by `label`, if the prefix continues.
    pub fn lookup_child(&self, node: NodeId, label: Label) -> Option<NodeId> {
        self.edges.get(&(node, label)).copied()
    }

    /// Node reached by following `labels` from the root.
    pub fn find(&self, labels: &[Label]) -> Option<NodeId> {
        labels
            .iter()
            .try_fold(Self::ROOT, |node, &label| self.lookup_child(node, label))
    }

    pub fn word(&self, node: NodeId) -> Option<TrieWord> {
        self.nodes.get(node as usize).and_then(|n| n.word)
    }

    pub fn is_terminal(&self, node: NodeId) -> bool {
        self.word(node).is_some()
    }

    /// Serialize in pre-order, children in ascending label order.
    pub fn write<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_u8(VERSION)?;
        w.write_u32::<LittleEndian>(self.num_labels)?;
        self.write_node(&mut w, Self::ROOT)?;
        w.flush()?;
        Ok(())
    }

    fn write_node<W: Write>(&self, w: &mut W, id: NodeId) -> Result<()> {
        let node = &self.nodes[id as usize];
        w.write_u32::<LittleEndian>(node.label)?;
        match node.word {
            Some(word) => {
                w.write_u8(1)?;
                w.write_u32::<LittleEndian>(word.vocab_index)?;
                w.write_f32::<LittleEndian>(word.unigram_score)?;
            }
            None => {
                w.write_u8(0)?;
                w.write_u32::<LittleEndian>(0)?;
                w.write_f32::<LittleEndian>(0.0)?;
            }
        }
        w.write_u32::<LittleEndian>(node.children.len() as u32)?;
        for &child in &node.children {
            self.write_node(w, child)?;
        }
        Ok(())
    }

    /// Read a trie written by [`Trie::write`].
    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(truncated)?;
        if &magic != MAGIC {
            return Err(CtcError::malformed("bad magic"));
        }
        let version = r.read_u8().map_err(truncated)?;
        if version != VERSION {
            return Err(CtcError::malformed(format!("unsupported version {}", version)));
        }
        let num_labels = r.read_u32::<LittleEndian>().map_err(truncated)?;
        let mut trie = Trie::with_labels(num_labels);

        let root = read_record(&mut r, num_labels)?;
        if root.label != ROOT_LABEL || root.word.is_some() {
            return Err(CtcError::malformed("bad root record"));
        }
        // (node, children still to read)
        let mut stack: Vec<(NodeId, u32)> = vec![(Self::ROOT, root.child_count)];
        while let Some(top) = stack.last_mut() {
            if top.1 == 0 {
                stack.pop();
                continue;
            }
            top.1 -= 1;
            let parent = top.0;
            let record = read_record(&mut r, num_labels)?;
            if record.label >= num_labels {
                return Err(CtcError::malformed(format!("label {} out of range", record.label)));
            }
            let last = trie.nodes[parent as usize]
                .children
                .last()
                .map(|&c| trie.nodes[c as usize].label);
            if last.is_some_and(|l| l >= record.label) {
                return Err(CtcError::malformed("children out of order"));
            }
            if record.word.is_none() && record.child_count == 0 {
                return Err(CtcError::malformed("non-terminal leaf"));
            }
            let id = trie.add_node(parent, record.label);
            if let Some(word) = record.word {
                trie.nodes[id as usize].word = Some(word);
                trie.num_words += 1;
            }
            stack.push((id, record.child_count));
        }

        let mut extra = [0u8; 1];
        if r.read(&mut extra)? != 0 {
            return Err(CtcError::malformed("trailing bytes"));
        }
        Ok(trie)
    }

    /// Write to `path`, replacing it only once the whole trie is written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        self.write(BufWriter::new(tmp.as_file_mut()))?;
        tmp.persist(path).map_err(|e| e.error)?;
        tracing::debug!(path = %path.display(), nodes = self.num_nodes(), words = self.num_words, "saved trie");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let fh = File::open(path).map_err(|e| CtcError::open(path, e))?;
        let trie = Self::read(BufReader::new(fh))?;
        tracing::debug!(path = %path.display(), nodes = trie.num_nodes(), words = trie.num_words, "loaded trie");
        Ok(trie)
    }
}

impl PartialEq for Trie {
    fn eq(&self, other: &Self) -> bool {
        if self.num_labels != other.num_labels || self.num_words != other.num_words {
            return false;
        }
        let mut stack = vec![(Self::ROOT, Self::ROOT)];
        while let Some((a, b)) = stack.pop() {
            let (a, b) = (&self.nodes[a as usize], &other.nodes[b as usize]);
            if a.label != b.label || a.word != b.word || a.children.len() != b.children.len() {
                return false;
            }
            stack.extend(a.children.iter().copied().zip(b.children.iter().copied()));
        }
        true
    }
}

struct NodeRecord {
    label: Label,
    word: Option<TrieWord>,
    child_count: u32,
}

fn read_record<R: Read>(r: &mut R, num_labels: u32) -> Result<NodeRecord> {
    let label = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let flag = r.read_u8().map_err(truncated)?;
    let vocab_index = r.read_u32::<LittleEndian>().map_err(truncated)?;
    let unigram_score = r.read_f32::<LittleEndian>().map_err(truncated)?;
    let child_count = r.read_u32::<LittleEndian>().map_err(truncated)?;
    if child_count > num_labels {
        return Err(CtcError::malformed(format!("{} children for {} labels", child_count, num_labels)));
    }
    let word = match flag {
        1 => Some(TrieWord {
            vocab_index,
            unigram_score,
        }),
        0 if vocab_index == 0 && unigram_score.to_bits() == 0 => None,
        0 => return Err(CtcError::malformed("payload on non-terminal node")),
        _ => return Err(CtcError::malformed(format!("bad terminal flag {}", flag))),
    };
    Ok(NodeRecord {
        label,
        word,
        child_count,
    })
}

fn truncated(e: io::Error) -> CtcError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CtcError::malformed("truncated")
    } else {
        CtcError::Io(e)
    }
}
