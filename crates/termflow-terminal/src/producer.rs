use crate::token::{CsiToken, Priority, Token, TokenBatch};
use smallvec::SmallVec;
use vte::{Params, Parser, Perform};

/// Minimum run of gangable tokens worth fusing; below this the wrapper costs
/// more than it saves.
const GANG_MIN: usize = 2;

/// Parses raw bytes from the input stream into [`TokenBatch`]es.
///
/// The producer owns the escape-sequence state machine, so partial sequences
/// split across reads are handled transparently: bytes of an unfinished
/// sequence stay latched in the parser until the next call completes them.
pub struct TokenProducer {
    parser: Parser,
    sink: TokenSink,
}

impl TokenProducer {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            sink: TokenSink::default(),
        }
    }

    /// Parse one read's worth of bytes into a normal-priority batch. The
    /// batch's byte accounting covers the whole input even when a trailing
    /// partial sequence produces no token yet.
    pub fn produce(&mut self, bytes: &[u8]) -> TokenBatch {
        for &byte in bytes {
            self.parser.advance(&mut self.sink, byte);
        }
        self.sink.flush_text();
        let tokens = coalesce(std::mem::take(&mut self.sink.tokens));
        TokenBatch::new(tokens, bytes.len(), Priority::Normal)
    }
}

impl Default for TokenProducer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct TokenSink {
    tokens: Vec<Token>,
    text_run: String,
}

impl TokenSink {
    fn flush_text(&mut self) {
        if !self.text_run.is_empty() {
            self.tokens.push(Token::Text(std::mem::take(&mut self.text_run)));
        }
    }
}

impl Perform for TokenSink {
    fn print(&mut self, c: char) {
        self.text_run.push(c);
    }

    fn execute(&mut self, byte: u8) {
        self.flush_text();
        self.tokens.push(Token::Ctrl(byte));
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        self.flush_text();
        if ignore {
            tracing::trace!(%action, "oversized CSI dropped");
            return;
        }
        self.tokens.push(Token::Csi(CsiToken {
            params: params.iter().map(SmallVec::from_slice).collect(),
            intermediates: SmallVec::from_slice(intermediates),
            action,
        }));
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], ignore: bool, byte: u8) {
        self.flush_text();
        if ignore {
            return;
        }
        self.tokens.push(Token::Esc {
            intermediates: SmallVec::from_slice(intermediates),
            byte,
        });
    }

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        self.flush_text();
        self.tokens
            .push(Token::Osc(params.iter().map(|p| p.to_vec()).collect()));
    }

    // DCS passthrough (sixel, etc.) is not interpreted; swallow it so the
    // payload never leaks into the text stream.
    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        self.flush_text();
        tracing::trace!(%action, "ignoring DCS sequence");
    }

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}
}

/// Fuse consecutive gangable tokens into [`Token::Gang`] units so the
/// executor pays its per-token bookkeeping once per run instead of once per
/// token. Non-gangable tokens pass through unchanged and break the run.
fn coalesce(tokens: Vec<Token>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut run: Vec<Token> = Vec::new();
    for token in tokens {
        if token.is_gangable() {
            run.push(token);
        } else {
            flush_run(&mut run, &mut out);
            out.push(token);
        }
    }
    flush_run(&mut run, &mut out);
    out
}

fn flush_run(run: &mut Vec<Token>, out: &mut Vec<Token>) {
    match run.len() {
        0 => {}
        1 => out.push(run.pop().unwrap()),
        n if n >= GANG_MIN => out.push(Token::Gang(std::mem::take(run))),
        _ => unreachable!(),
    }
}
