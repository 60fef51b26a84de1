use crate::cell::UnderlineStyle;
use crate::colors::{NamedColor, TermColor};
use crate::state::TerminalState;
use crate::token::{CsiToken, Token};
use smallvec::SmallVec;

/// What the executor should do after a token was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOutcome {
    /// Token applied; keep going.
    Done,
    /// The token rolled back: it must not be consumed, and is re-executed
    /// on the next drain cycle. Raised by tokens that have to wait for
    /// state that is not available yet.
    Rollback,
}

/// Apply one token to the terminal model.
///
/// Malformed or unsupported sequences are absorbed: parameters clamp to
/// valid ranges inside the grid operations and unknown selectors are traced
/// and dropped. Bad input may garble the screen but never panics and never
/// desynchronizes the model.
pub fn apply_token(state: &mut TerminalState, token: &Token) -> TokenOutcome {
    match token {
        Token::Text(text) => {
            for c in text.chars() {
                state.grid.write_char(c, &mut state.history);
            }
        }
        Token::Ctrl(byte) => apply_ctrl(state, *byte),
        Token::Esc {
            intermediates,
            byte,
        } => apply_esc(state, intermediates, *byte),
        Token::Csi(csi) => apply_csi(state, csi),
        Token::Osc(params) => apply_osc(state, params),
        Token::Gang(members) => {
            // A gang executes as one unit. Re-executing it after a mid-gang
            // rollback would apply the earlier members twice, so a rollback
            // raised inside a gang is dropped.
            let mut dropped = false;
            for member in members {
                dropped |= apply_token(state, member) == TokenOutcome::Rollback;
            }
            if dropped {
                tracing::warn!("rollback raised inside a gang; ignored");
            }
            return TokenOutcome::Done;
        }
    }
    if state.take_rollback() {
        TokenOutcome::Rollback
    } else {
        TokenOutcome::Done
    }
}

fn apply_ctrl(state: &mut TerminalState, byte: u8) {
    match byte {
        0x07 => tracing::trace!("bell"),
        0x08 => state.grid.backspace(),
        0x09 => state.grid.tab(),
        // LF, VT and FF all behave as line feed.
        0x0a | 0x0b | 0x0c => state.grid.newline(&mut state.history),
        0x0d => state.grid.carriage_return(),
        _ => tracing::trace!(byte, "ignoring control byte"),
    }
}

fn apply_esc(state: &mut TerminalState, intermediates: &[u8], byte: u8) {
    if !intermediates.is_empty() {
        // Charset designation and similar: not interpreted.
        tracing::trace!(?intermediates, byte, "ignoring ESC sequence");
        return;
    }
    match byte {
        b'7' => state.grid.save_cursor(),
        b'8' => state.grid.restore_cursor(),
        b'D' => state.grid.index(&mut state.history),
        b'E' => {
            state.grid.carriage_return();
            state.grid.index(&mut state.history);
        }
        b'M' => state.grid.reverse_index(),
        b'H' => state.grid.set_tab_stop(),
        b'c' => {
            // RIS: the screen resets in place; scrollback and its numbering
            // survive.
            let (w, h) = (state.grid.width(), state.grid.height());
            state.grid = crate::grid::Grid::new(w, h);
        }
        _ => tracing::trace!(byte, "ignoring ESC dispatch"),
    }
}

fn apply_csi(state: &mut TerminalState, csi: &CsiToken) {
    if csi.is_private() {
        return apply_private_mode(state, csi);
    }
    let grid = &mut state.grid;
    match csi.action {
        '@' => grid.insert_chars(csi.param(0, 1) as usize),
        'A' => grid.cursor_up(csi.param(0, 1) as usize),
        'B' => grid.cursor_down(csi.param(0, 1) as usize),
        'C' => grid.cursor_forward(csi.param(0, 1) as usize),
        'D' => grid.cursor_backward(csi.param(0, 1) as usize),
        'E' => {
            grid.cursor_down(csi.param(0, 1) as usize);
            grid.carriage_return();
        }
        'F' => {
            grid.cursor_up(csi.param(0, 1) as usize);
            grid.carriage_return();
        }
        'G' => {
            let row = grid.cursor.row;
            grid.cursor_to(row, csi.param(0, 1) as usize - 1);
        }
        'H' | 'f' => grid.cursor_to(
            csi.param(0, 1) as usize - 1,
            csi.param(1, 1) as usize - 1,
        ),
        'J' => grid.erase_display(csi.raw(0), &mut state.history),
        'K' => grid.erase_line(csi.raw(0)),
        'L' => grid.insert_lines(csi.param(0, 1) as usize),
        'M' => grid.delete_lines(csi.param(0, 1) as usize),
        'P' => grid.delete_chars(csi.param(0, 1) as usize),
        'S' => grid.scroll_up(csi.param(0, 1) as usize, &mut state.history),
        'T' => grid.scroll_down(csi.param(0, 1) as usize),
        'X' => grid.erase_chars(csi.param(0, 1) as usize),
        'b' => grid.repeat_char(csi.param(0, 1) as usize, &mut state.history),
        'd' => {
            let col = grid.cursor.col;
            grid.cursor_to(csi.param(0, 1) as usize - 1, col);
        }
        'g' => grid.clear_tab_stop(csi.raw(0)),
        'm' => apply_sgr(grid, &csi.params),
        'r' => {
            let bottom_default = grid.height() as u16;
            grid.set_scroll_region(
                csi.param(0, 1) as usize - 1,
                csi.param(1, bottom_default) as usize - 1,
            );
        }
        's' => grid.save_cursor(),
        'u' => grid.restore_cursor(),
        _ => tracing::trace!(action = %csi.action, "ignoring CSI dispatch"),
    }
}

fn apply_private_mode(state: &mut TerminalState, csi: &CsiToken) {
    let set = match csi.action {
        'h' => true,
        'l' => false,
        _ => {
            tracing::trace!(action = %csi.action, "ignoring private CSI");
            return;
        }
    };
    for param in &csi.params {
        match param.first().copied().unwrap_or(0) {
            6 => state.grid.set_origin_mode(set),
            7 => state.grid.set_auto_wrap(set),
            mode => tracing::trace!(mode, set, "ignoring private mode"),
        }
    }
}

fn apply_osc(state: &mut TerminalState, params: &[Vec<u8>]) {
    match params.first().map(Vec::as_slice) {
        // OSC 0 and 2 both set the window title.
        Some(b"0") | Some(b"2") => {
            if let Some(title) = params.get(1) {
                state.set_title(String::from_utf8_lossy(title).into_owned());
            }
        }
        selector => tracing::trace!(?selector, "ignoring OSC"),
    }
}

/// Select Graphic Rendition. Handles both semicolon parameters and colon
/// sub-parameters for underline styles (4:x) and extended colors (38/48/58).
fn apply_sgr(grid: &mut crate::grid::Grid, params: &[SmallVec<[u16; 2]>]) {
    if params.is_empty() {
        reset_sgr(grid);
        return;
    }
    let mut i = 0;
    while i < params.len() {
        let sub = &params[i];
        let code = sub.first().copied().unwrap_or(0);
        match code {
            0 => reset_sgr(grid),
            1 => grid.current_attrs.bold = true,
            2 => grid.current_attrs.dim = true,
            3 => grid.current_attrs.italic = true,
            4 => {
                grid.current_attrs.underline = match sub.get(1).copied() {
                    Some(0) => UnderlineStyle::None,
                    Some(2) => UnderlineStyle::Double,
                    Some(3) => UnderlineStyle::Curly,
                    Some(4) => UnderlineStyle::Dotted,
                    Some(5) => UnderlineStyle::Dashed,
                    _ => UnderlineStyle::Single,
                };
            }
            5 | 6 => grid.current_attrs.blink = true,
            7 => grid.current_attrs.inverse = true,
            8 => grid.current_attrs.hidden = true,
            9 => grid.current_attrs.strikethrough = true,
            21 => grid.current_attrs.underline = UnderlineStyle::Double,
            22 => {
                grid.current_attrs.bold = false;
                grid.current_attrs.dim = false;
            }
            23 => grid.current_attrs.italic = false,
            24 => grid.current_attrs.underline = UnderlineStyle::None,
            25 => grid.current_attrs.blink = false,
            27 => grid.current_attrs.inverse = false,
            28 => grid.current_attrs.hidden = false,
            29 => grid.current_attrs.strikethrough = false,
            30..=37 => {
                grid.current_fg = TermColor::Named(NamedColor::from_ansi(code as u8 - 30, false));
            }
            38 => {
                let (color, consumed) = extended_color(params, i);
                if let Some(color) = color {
                    grid.current_fg = color;
                }
                i += consumed;
            }
            39 => grid.current_fg = TermColor::Default,
            40..=47 => {
                grid.current_bg = TermColor::Named(NamedColor::from_ansi(code as u8 - 40, false));
            }
            48 => {
                let (color, consumed) = extended_color(params, i);
                if let Some(color) = color {
                    grid.current_bg = color;
                }
                i += consumed;
            }
            49 => grid.current_bg = TermColor::Default,
            58 => {
                let (color, consumed) = extended_color(params, i);
                grid.current_attrs.underline_color = color;
                i += consumed;
            }
            59 => grid.current_attrs.underline_color = None,
            90..=97 => {
                grid.current_fg = TermColor::Named(NamedColor::from_ansi(code as u8 - 90, true));
            }
            100..=107 => {
                grid.current_bg = TermColor::Named(NamedColor::from_ansi(code as u8 - 100, true));
            }
            _ => tracing::trace!(code, "ignoring SGR code"),
        }
        i += 1;
    }
}

fn reset_sgr(grid: &mut crate::grid::Grid) {
    grid.current_attrs = Default::default();
    grid.current_fg = TermColor::Default;
    grid.current_bg = TermColor::Default;
}

/// Decode the color payload of SGR 38/48/58. Returns the color (if valid)
/// and how many extra semicolon parameters were consumed; colon
/// sub-parameters consume none.
fn extended_color(params: &[SmallVec<[u16; 2]>], i: usize) -> (Option<TermColor>, usize) {
    let sub = &params[i];
    if sub.len() > 1 {
        // Colon form, e.g. 38:5:196 or 38:2::r:g:b (with colorspace id).
        let color = match sub.get(1).copied() {
            Some(5) => sub.get(2).map(|&n| TermColor::Indexed(n as u8)),
            Some(2) if sub.len() >= 6 => Some(TermColor::Rgb(
                sub[3].min(255) as u8,
                sub[4].min(255) as u8,
                sub[5].min(255) as u8,
            )),
            Some(2) if sub.len() == 5 => Some(TermColor::Rgb(
                sub[2].min(255) as u8,
                sub[3].min(255) as u8,
                sub[4].min(255) as u8,
            )),
            _ => None,
        };
        return (color, 0);
    }
    // Semicolon form, e.g. 38;5;196 or 38;2;r;g;b.
    let first = |index: usize| params.get(index).and_then(|p| p.first()).copied();
    match first(i + 1) {
        Some(5) => match first(i + 2) {
            Some(n) => (Some(TermColor::Indexed(n as u8)), 2),
            None => (None, 1),
        },
        Some(2) => match (first(i + 2), first(i + 3), first(i + 4)) {
            (Some(r), Some(g), Some(b)) => (
                Some(TermColor::Rgb(
                    r.min(255) as u8,
                    g.min(255) as u8,
                    b.min(255) as u8,
                )),
                4,
            ),
            _ => (None, params.len() - i - 1),
        },
        _ => (None, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::BufferPosition;
    use crate::cell::CellWidth;
    use crate::producer::TokenProducer;
    use termflow_core::config::TerminalConfig;

    fn state_with(cols: usize, rows: usize) -> TerminalState {
        TerminalState::new(&TerminalConfig {
            cols,
            rows,
            ..TerminalConfig::default()
        })
    }

    fn feed(state: &mut TerminalState, bytes: &[u8]) {
        let batch = TokenProducer::new().produce(bytes);
        for token in &batch.tokens {
            apply_token(state, token);
        }
    }

    #[test]
    fn narrowing_rewraps_wrapped_lines_end_to_end() {
        let mut state = state_with(5, 4);
        feed(&mut state, b"abcdefgh\r\nijkl\r\n");
        let screen: Vec<String> = (0..4).map(|r| state.grid.row_text(r)).collect();
        assert_eq!(screen, vec!["abcde", "fgh", "ijkl", ""]);
        state.set_size(4, 4);
        let screen: Vec<String> = (0..4).map(|r| state.grid.row_text(r)).collect();
        assert_eq!(screen, vec!["abcd", "efgh", "ijkl", ""]);
    }

    #[test]
    fn cursor_addressing_and_erase() {
        let mut state = state_with(10, 3);
        feed(&mut state, b"aaaaaaaaaa\r\nbbbbbbbbbb\r\ncccccccccc");
        feed(&mut state, b"\x1b[2;5H\x1b[K");
        assert_eq!(state.grid.row_text(1), "bbbb");
        feed(&mut state, b"\x1b[2J");
        assert!((0..3).all(|r| state.grid.row_text(r).is_empty()));
        // History still intact after a display erase.
        assert_eq!(state.history.len(), 0);
    }

    #[test]
    fn sgr_semicolon_and_colon_forms_agree() {
        let mut a = state_with(4, 2);
        feed(&mut a, b"\x1b[38;5;196mx");
        let mut b = state_with(4, 2);
        feed(&mut b, b"\x1b[38:5:196mx");
        assert_eq!(a.grid.row(0).unwrap().cells[0].fg, TermColor::Indexed(196));
        assert_eq!(
            a.grid.row(0).unwrap().cells[0].fg,
            b.grid.row(0).unwrap().cells[0].fg
        );
    }

    #[test]
    fn sgr_truecolor_and_reset() {
        let mut state = state_with(4, 2);
        feed(&mut state, b"\x1b[1;38;2;10;20;30ma\x1b[mb");
        let row = state.grid.row(0).unwrap();
        assert_eq!(row.cells[0].fg, TermColor::Rgb(10, 20, 30));
        assert!(row.cells[0].attrs.bold);
        assert_eq!(row.cells[1].fg, TermColor::Default);
        assert!(!row.cells[1].attrs.bold);
    }

    #[test]
    fn curly_underline_subparameter() {
        let mut state = state_with(4, 2);
        feed(&mut state, b"\x1b[4:3mx");
        assert_eq!(
            state.grid.row(0).unwrap().cells[0].attrs.underline,
            UnderlineStyle::Curly
        );
    }

    #[test]
    fn osc_sets_title() {
        let mut state = state_with(4, 2);
        feed(&mut state, b"\x1b]2;hello there\x07");
        assert_eq!(state.title(), Some("hello there"));
    }

    #[test]
    fn autowrap_mode_toggles() {
        let mut state = state_with(3, 2);
        feed(&mut state, b"\x1b[?7labcdef");
        // With DECAWM off the cursor sticks at the last column.
        assert_eq!(state.grid.row_text(0), "abf");
        assert_eq!(state.grid.row_text(1), "");
        feed(&mut state, b"\x1b[?7h");
        assert!(state.grid.auto_wrap());
    }

    #[test]
    fn scroll_region_and_reverse_index() {
        let mut state = state_with(4, 4);
        feed(&mut state, b"a\r\nb\r\nc\r\nd");
        feed(&mut state, b"\x1b[2;3r\x1b[2;1H\x1bM");
        // Reverse index at the region top scrolls the region down.
        assert_eq!(state.grid.row_text(0), "a");
        assert_eq!(state.grid.row_text(1), "");
        assert_eq!(state.grid.row_text(2), "b");
        assert_eq!(state.grid.row_text(3), "d");
    }

    #[test]
    fn malformed_sequences_are_absorbed() {
        let mut state = state_with(5, 3);
        // Out-of-range cursor target, unknown CSI, unknown SGR, bare 38.
        feed(&mut state, b"\x1b[99;99H\x1b[=5z\x1b[999m\x1b[38mok");
        assert_eq!(state.grid.row_text(2), "ok");
    }

    #[test]
    fn rollback_surfaces_from_a_plain_token() {
        let mut state = state_with(10, 2);
        let batch = TokenProducer::new().produce(b"one");
        state.request_rollback();
        assert_eq!(
            apply_token(&mut state, &batch.tokens[0]),
            TokenOutcome::Rollback
        );
        // The flag was consumed; the retry completes.
        assert_eq!(
            apply_token(&mut state, &batch.tokens[0]),
            TokenOutcome::Done
        );
    }

    #[test]
    fn rollback_inside_a_gang_is_dropped() {
        let mut state = state_with(10, 2);
        let batch = TokenProducer::new().produce(b"a\rb");
        assert!(matches!(batch.tokens[0], Token::Gang(_)));
        state.request_rollback();
        assert_eq!(
            apply_token(&mut state, &batch.tokens[0]),
            TokenOutcome::Done
        );
    }

    #[test]
    fn wide_text_end_to_end() {
        let mut state = state_with(6, 2);
        feed(&mut state, "你好a".as_bytes());
        let row = state.grid.row(0).unwrap();
        assert_eq!(row.cells[0].wide, CellWidth::Wide);
        assert_eq!(row.cells[1].wide, CellWidth::Spacer);
        assert_eq!(row.cells[4].c, 'a');
        let hits = state.search("a", true, true).unwrap();
        assert_eq!(hits[0].interval.start, BufferPosition::new(0, 4));
    }
}
