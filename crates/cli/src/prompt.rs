use std::io::{self, BufRead, Write};

/// The only answer that counts as consent.
pub const CONFIRM_TOKEN: &str = "yes";

/// Ask `question` and read one line. Anything but the exact token is a no.
pub fn confirm(question: &str, input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    writeln!(output, "{question} (type '{CONFIRM_TOKEN}' to save)")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim_end_matches(['\r', '\n']) == CONFIRM_TOKEN)
}
