//! HTML entity handling for the markup subset.

/// Decode named and numeric character references.
///
/// Unknown references are left untouched.
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];

        match candidate.find(';').filter(|end| *end <= 10) {
            Some(end) => match decode_reference(&candidate[1..end]) {
                Some(ch) => {
                    out.push(ch);
                    rest = &candidate[end + 1..];
                }
                None => {
                    out.push('&');
                    rest = &candidate[1..];
                }
            },
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_reference(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let numeric = name.strip_prefix('#')?;
            let code = match numeric.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => numeric.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Escape text for inclusion in the markup subset.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            other => out.push(other),
        }
    }
    out
}
