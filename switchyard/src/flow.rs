//! Flow codes: which inputs of an element influence which outputs.
//!
//! An element declares its internal flow as a two-sided string
//! `"INPUTS/OUTPUTS"`. Each side is a sequence of port codes (a letter, a
//! bracketed class like `[xy]`, or `#`) and the last code repeats for any
//! remaining ports. An input influences an output when their codes share a
//! letter, or when both are `#` and the ports have the same number.
//!
//! `"x/x"` (every input reaches every output) is [`COMPLETE_FLOW`]; a
//! classifier-like element writes `"x/y"` (inputs reach no output); an
//! n-way pass-through writes `"#/#"`.
//!
//! Graph walks consult flow codes constantly, so the string form is compiled
//! once per element into a bit matrix.

use crate::report::{ErrorHandler, Landmark};

/// The flow code declaring that every input influences every output.
pub const COMPLETE_FLOW: &str = "x/x";

/// A per-port character class: a set of letters, possibly the port-number
/// class `#`.
#[derive(Clone, Copy, Default)]
struct PortCode {
    /// Bit `i` set when letter `i` is in the class (a-z map to 0-25,
    /// A-Z to 26-51).
    letters: u64,
    /// True when the class contains `#`.
    hash: bool,
}

impl PortCode {
    fn matches(self, self_port: usize, other: PortCode, other_port: usize) -> bool {
        (self.letters & other.letters) != 0 || (self.hash && other.hash && self_port == other_port)
    }
}

fn letter_bit(c: char) -> Option<u64> {
    match c {
        'a'..='z' => Some(1 << (c as u32 - 'a' as u32)),
        'A'..='Z' => Some(1 << (26 + c as u32 - 'A' as u32)),
        _ => None,
    }
}

/// Parses one side of a flow code into per-port classes.
fn parse_side(side: &str, nports: usize) -> Result<Vec<PortCode>, String> {
    let mut codes = Vec::new();
    let mut chars = side.chars().peekable();
    while let Some(c) = chars.next() {
        let code = match c {
            '#' => PortCode { letters: 0, hash: true },
            '[' => {
                let mut code = PortCode::default();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some('#') => code.hash = true,
                        Some(c) => match letter_bit(c) {
                            Some(bit) => code.letters |= bit,
                            None => return Err(format!("bad flow code character {:?}", c)),
                        },
                        None => return Err("unterminated class in flow code".to_string()),
                    }
                }
                code
            }
            c => match letter_bit(c) {
                Some(bit) => PortCode { letters: bit, hash: false },
                None => return Err(format!("bad flow code character {:?}", c)),
            },
        };
        codes.push(code);
    }
    if codes.is_empty() && nports > 0 {
        return Err("flow code side is empty".to_string());
    }
    // The last code repeats for remaining ports.
    while codes.len() < nports {
        let last = *codes.last().unwrap();
        codes.push(last);
    }
    codes.truncate(nports.max(1));
    Ok(codes)
}

/// A compiled flow code: a bit matrix over (input, output) pairs.
#[derive(Clone)]
pub struct FlowCode {
    ninputs: usize,
    noutputs: usize,
    /// Row per input, `ceil(noutputs / 64)` words per row.
    words_per_row: usize,
    matrix: Vec<u64>,
}

impl FlowCode {
    /// Compiles `code` for an element with the given port counts.
    pub fn parse(code: &str, ninputs: usize, noutputs: usize) -> Result<FlowCode, String> {
        let (in_side, out_side) = code
            .split_once('/')
            .ok_or_else(|| format!("flow code {:?} lacks a '/'", code))?;
        let in_codes = parse_side(in_side, ninputs)?;
        let out_codes = parse_side(out_side, noutputs)?;

        let words_per_row = noutputs.div_ceil(64).max(1);
        let mut matrix = vec![0u64; ninputs * words_per_row];
        for (i, ic) in in_codes.iter().enumerate().take(ninputs) {
            for (o, oc) in out_codes.iter().enumerate().take(noutputs) {
                if ic.matches(i, *oc, o) {
                    matrix[i * words_per_row + o / 64] |= 1 << (o % 64);
                }
            }
        }
        Ok(FlowCode {
            ninputs,
            noutputs,
            words_per_row,
            matrix,
        })
    }

    /// Compiles `code`, reporting failure through `errh` with a landmark and
    /// falling back to complete flow.
    pub fn parse_or_complete(
        code: &str,
        ninputs: usize,
        noutputs: usize,
        landmark: &Landmark,
        errh: &mut dyn ErrorHandler,
    ) -> FlowCode {
        match Self::parse(code, ninputs, noutputs) {
            Ok(fc) => fc,
            Err(e) => {
                errh.lerror(landmark, &e);
                Self::complete(ninputs, noutputs)
            }
        }
    }

    /// The complete flow: every input influences every output.
    pub fn complete(ninputs: usize, noutputs: usize) -> FlowCode {
        Self::parse(COMPLETE_FLOW, ninputs, noutputs).expect("complete flow parses")
    }

    /// True when `input` influences `output`.
    pub fn flows(&self, input: usize, output: usize) -> bool {
        if input >= self.ninputs || output >= self.noutputs {
            return false;
        }
        self.matrix[input * self.words_per_row + output / 64] & (1 << (output % 64)) != 0
    }

    /// Number of inputs this code was compiled for.
    pub fn ninputs(&self) -> usize {
        self.ninputs
    }

    /// Number of outputs this code was compiled for.
    pub fn noutputs(&self) -> usize {
        self.noutputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_flow() {
        let fc = FlowCode::parse("x/x", 2, 3).unwrap();
        for i in 0..2 {
            for o in 0..3 {
                assert!(fc.flows(i, o));
            }
        }
        assert!(!fc.flows(2, 0));
        assert!(!fc.flows(0, 3));
    }

    #[test]
    fn classifier_flow() {
        // Input 0 reaches every output; input 1 reaches none.
        let fc = FlowCode::parse("xy/x", 2, 4).unwrap();
        for o in 0..4 {
            assert!(fc.flows(0, o));
            assert!(!fc.flows(1, o));
        }
    }

    #[test]
    fn hash_flow_is_per_port() {
        let fc = FlowCode::parse("#/#", 3, 3).unwrap();
        for i in 0..3 {
            for o in 0..3 {
                assert_eq!(fc.flows(i, o), i == o);
            }
        }
    }

    #[test]
    fn class_brackets() {
        // Input 0 (xy) intersects output 0 (x) and output 1 (y); input 1 (z)
        // intersects neither.
        let fc = FlowCode::parse("[xy]z/xy", 2, 2).unwrap();
        assert!(fc.flows(0, 0));
        assert!(fc.flows(0, 1));
        assert!(!fc.flows(1, 0));
        assert!(!fc.flows(1, 1));
    }

    #[test]
    fn last_code_repeats() {
        let fc = FlowCode::parse("x/xy", 1, 4).unwrap();
        assert!(fc.flows(0, 0));
        assert!(!fc.flows(0, 1));
        assert!(!fc.flows(0, 3));
    }

    #[test]
    fn rejects_malformed() {
        assert!(FlowCode::parse("x", 1, 1).is_err());
        assert!(FlowCode::parse("x/[y", 1, 1).is_err());
        assert!(FlowCode::parse("x/!", 1, 1).is_err());
        assert!(FlowCode::parse("/x", 1, 1).is_err());
    }
}
