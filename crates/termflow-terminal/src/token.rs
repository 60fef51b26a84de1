use smallvec::SmallVec;
use std::fmt;

/// Execution priority of a token batch. High-priority batches preempt the
/// normal stream and are exempt from byte backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    High,
    #[default]
    Normal,
}

/// A parsed CSI sequence: parameters (each with possible colon-separated
/// sub-parameters), intermediate bytes, and the final byte that selects the
/// operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsiToken {
    pub params: Vec<SmallVec<[u16; 2]>>,
    pub intermediates: SmallVec<[u8; 2]>,
    pub action: char,
}

impl CsiToken {
    /// Parameter `index` with a default for missing/zero entries, following
    /// the VT convention that an omitted parameter means its default.
    pub fn param(&self, index: usize, default: u16) -> u16 {
        match self.params.get(index).and_then(|p| p.first()) {
            Some(&v) if v != 0 => v,
            _ => default,
        }
    }

    /// Parameter `index` as sent, 0 when absent. For selectors where 0 is
    /// itself meaningful (erase modes, TBC).
    pub fn raw(&self, index: usize) -> u16 {
        self.params
            .get(index)
            .and_then(|p| p.first())
            .copied()
            .unwrap_or(0)
    }

    /// Whether `?` prefixes the parameters (DEC private sequences).
    pub fn is_private(&self) -> bool {
        self.intermediates.first() == Some(&b'?')
    }
}

/// One unit of parsed terminal input, produced by the token producer and
/// consumed by the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A run of printable characters.
    Text(String),
    /// A C0 control byte (BEL, BS, HT, LF, CR, ...).
    Ctrl(u8),
    /// An ESC sequence that is not CSI/OSC (e.g. ESC 7, ESC M).
    Esc {
        intermediates: SmallVec<[u8; 2]>,
        byte: u8,
    },
    Csi(CsiToken),
    /// An OSC sequence, split at `;` into raw parameter chunks.
    Osc(Vec<Vec<u8>>),
    /// Several consecutive low-cost tokens fused into one unit so the
    /// executor amortizes per-token overhead. Gangs never nest and never
    /// contain high-latency members.
    Gang(Vec<Token>),
}

impl Token {
    /// Whether executing this token can take long enough that the executor
    /// should yield to pending high-priority work afterwards. Gang members
    /// are always cheap, so a gang is judged by its length.
    pub fn is_high_latency(&self) -> bool {
        match self {
            Token::Text(s) => s.len() > 1024,
            Token::Csi(csi) => matches!(csi.action, 'J' | 'L' | 'M'),
            Token::Gang(members) => members.len() > 256,
            _ => false,
        }
    }

    /// Approximate wire length of this token. The producer tracks exact
    /// sizes at batch granularity for backpressure; this estimate attributes
    /// them per token for execution reporting.
    pub fn byte_len(&self) -> usize {
        match self {
            Token::Text(s) => s.len(),
            Token::Ctrl(_) => 1,
            Token::Esc { intermediates, .. } => 2 + intermediates.len(),
            Token::Csi(csi) => 3 + csi.intermediates.len() + 4 * csi.params.len(),
            Token::Osc(params) => {
                4 + params.len() + params.iter().map(Vec::len).sum::<usize>()
            }
            Token::Gang(members) => members.iter().map(Token::byte_len).sum(),
        }
    }

    /// Whether the token may join a gang: plain text, simple controls, and
    /// cursor-motion CSI that touch only the grid.
    pub fn is_gangable(&self) -> bool {
        match self {
            Token::Text(_) | Token::Ctrl(_) => true,
            Token::Csi(csi) => {
                csi.intermediates.is_empty()
                    && matches!(csi.action, 'A' | 'B' | 'C' | 'D' | 'G' | 'H' | 'm')
            }
            _ => false,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Text(s) => write!(f, "Text({} chars)", s.chars().count()),
            Token::Ctrl(b) => write!(f, "Ctrl(0x{b:02x})"),
            Token::Esc { byte, .. } => write!(f, "Esc({})", *byte as char),
            Token::Csi(csi) => write!(f, "Csi({})", csi.action),
            Token::Osc(params) => write!(f, "Osc({} params)", params.len()),
            Token::Gang(members) => write!(f, "Gang({} tokens)", members.len()),
        }
    }
}

/// A batch of tokens parsed from one read of the input stream, executed as a
/// unit. `cursor` tracks mid-batch progress so a batch can be parked when the
/// executor yields to high-priority work and resumed later.
#[derive(Debug)]
pub struct TokenBatch {
    pub tokens: Vec<Token>,
    /// Index of the next unexecuted token.
    pub cursor: usize,
    /// Size of the raw input this batch was parsed from, used for byte
    /// accounting against the backpressure budget.
    pub byte_len: usize,
    pub priority: Priority,
    /// Whether this batch holds `byte_len` permits of the backpressure
    /// semaphore (high-priority batches never acquire any).
    pub holds_permits: bool,
}

impl TokenBatch {
    pub fn new(tokens: Vec<Token>, byte_len: usize, priority: Priority) -> Self {
        Self {
            tokens,
            cursor: 0,
            byte_len,
            priority,
            holds_permits: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    pub fn remaining(&self) -> usize {
        self.tokens.len() - self.cursor.min(self.tokens.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn csi(action: char, params: &[u16]) -> Token {
        Token::Csi(CsiToken {
            params: params.iter().map(|&p| smallvec![p]).collect(),
            intermediates: SmallVec::new(),
            action,
        })
    }

    #[test]
    fn param_defaults_apply_to_missing_and_zero() {
        let Token::Csi(token) = csi('H', &[0, 5]) else {
            unreachable!()
        };
        assert_eq!(token.param(0, 1), 1);
        assert_eq!(token.param(1, 1), 5);
        assert_eq!(token.param(2, 1), 1);
    }

    #[test]
    fn cursor_motion_gangs_but_osc_does_not() {
        assert!(csi('C', &[3]).is_gangable());
        assert!(Token::Text("hi".into()).is_gangable());
        assert!(!Token::Osc(vec![b"0".to_vec()]).is_gangable());
        assert!(!csi('J', &[2]).is_gangable());
    }

    #[test]
    fn byte_length_tracks_content() {
        assert_eq!(Token::Text("hello".into()).byte_len(), 5);
        assert_eq!(Token::Ctrl(0x0a).byte_len(), 1);
        let gang = Token::Gang(vec![Token::Text("ab".into()), Token::Ctrl(0x0d)]);
        assert_eq!(gang.byte_len(), 3);
    }

    #[test]
    fn batch_progress_tracking() {
        let mut batch = TokenBatch::new(
            vec![Token::Ctrl(b'\n'), Token::Text("x".into())],
            5,
            Priority::Normal,
        );
        assert_eq!(batch.remaining(), 2);
        batch.cursor = 1;
        assert!(!batch.is_finished());
        batch.cursor = 2;
        assert!(batch.is_finished());
    }
}
