//! Compression codecs: the trained, length-limited Huffman codec and the
//! one, always-available DNA codec (spec.md §4.4).

pub mod dna;
pub mod huffman;
pub mod intlist;

pub use huffman::{CodecState, HuffmanCodec};

/// A codec slot attached to a line-type's field tuple or list payload.
/// Mirrors `VGPlib.h`'s `VGPcodec *` pointer, which is either a trained
/// per-line-type Huffman codec or the shared DNA sentinel.
#[derive(Clone)]
pub enum Codec {
    Huffman(HuffmanCodec),
    Dna,
}

impl Codec {
    pub fn new_huffman() -> Self {
        Codec::Huffman(HuffmanCodec::new())
    }

    pub fn is_dna(&self) -> bool {
        matches!(self, Codec::Dna)
    }

    pub fn state(&self) -> CodecState {
        match self {
            Codec::Huffman(h) => h.state(),
            Codec::Dna => CodecState::CodedRead,
        }
    }

    pub fn as_huffman(&self) -> Option<&HuffmanCodec> {
        match self {
            Codec::Huffman(h) => Some(h),
            Codec::Dna => None,
        }
    }

    pub fn as_huffman_mut(&mut self) -> Option<&mut HuffmanCodec> {
        match self {
            Codec::Huffman(h) => Some(h),
            Codec::Dna => None,
        }
    }
}
