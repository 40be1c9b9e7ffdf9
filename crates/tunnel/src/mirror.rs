//! Terminal output scrubbing for the clean mirror mode.
//!
//! The shell-side mirror can strip terminal escape sequences so that the
//! mirrored copy is readable as plain text. The scrubber works on raw byte
//! chunks exactly as they come off the PTY; it is stateless across chunks,
//! so a sequence split across two reads may leak its tail, which is
//! acceptable for a human-readable log.

/// Strip escape sequences and non-printable bytes from one output chunk.
///
/// Recognized sequences: CSI (`ESC [`), OSC (`ESC ]`), and DCS (`ESC P`).
/// Any other byte after ESC is treated as introducing a CSI-style sequence
/// and consumed through its final byte. A backspace is rewritten to the
/// erase triple `BS SP BS` so overstruck prompts read correctly. Of the
/// remaining bytes, only tab, LF, CR, and printable ASCII pass through.
pub fn scrub(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let b = input[i];
        if b == 0x1b {
            // A lone ESC at the end of the chunk has no sequence to skip;
            // drop it and whatever would have followed.
            if i + 1 >= input.len() {
                break;
            }
            match input[i + 1] {
                b'[' => {
                    // CSI: parameters and intermediates end at a final
                    // byte in 0x40..=0x7e.
                    i += 2;
                    while i < input.len() && !(0x40..=0x7e).contains(&input[i]) {
                        i += 1;
                    }
                    i += 1;
                }
                b']' => {
                    // OSC: terminated by BEL or by ESC \.
                    i += 2;
                    while i < input.len() {
                        if input[i] == 0x07 {
                            i += 1;
                            break;
                        }
                        if input[i] == 0x1b && i + 1 < input.len() && input[i + 1] == b'\\' {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                }
                b'P' => {
                    // DCS: terminated by ESC \.
                    i += 2;
                    while i < input.len() {
                        if input[i] == 0x1b && i + 1 < input.len() && input[i + 1] == b'\\' {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                }
                _ => {
                    // Unknown introducer: consume like a CSI sequence.
                    i += 2;
                    while i < input.len() && !(0x40..=0x7e).contains(&input[i]) {
                        i += 1;
                    }
                    i += 1;
                }
            }
        } else if b == 0x08 {
            out.extend_from_slice(&[0x08, 0x20, 0x08]);
            i += 1;
        } else if b == b'\t' || b == b'\n' || b == b'\r' || (0x20..=0x7e).contains(&b) {
            out.push(b);
            i += 1;
        } else {
            i += 1;
        }
    }
    out
}
