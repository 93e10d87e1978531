//! Minimal ANSI text styling.
//!
//! Terminal colorization is explicitly out of scope for this crate (it's
//! thin glue over whatever the operator's terminal renders); this module
//! only carries the handful of wrappers the error-reporting and `show`
//! surfaces need for parity with the source's `[!] error:` convention.

pub fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

pub fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}

pub fn blue(s: &str) -> String {
    format!("\x1b[94m{s}\x1b[0m")
}

pub fn yellow(s: &str) -> String {
    format!("\x1b[93m{s}\x1b[0m")
}

pub fn cyan(s: &str) -> String {
    format!("\x1b[96m{s}\x1b[0m")
}

pub fn darkcyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

pub fn green(s: &str) -> String {
    format!("\x1b[92m{s}\x1b[0m")
}

pub fn error_line(msg: &str) -> String {
    format!("{} {msg}", bold(&red("[!] error:")))
}
