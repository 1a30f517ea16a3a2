//! Microunit amount formatting

/// Microunits per whole unit
pub const MICROUNITS_PER_UNIT: u64 = 1_000_000;

/// Format microunits as whole units with thousands separators
/// (`1_234_567_890` -> `"1,234.56789"`).
pub fn format_microunits(microunits: u64) -> String {
    let whole = add_thousand_separators(microunits / MICROUNITS_PER_UNIT);
    let frac = format!("{:06}", microunits % MICROUNITS_PER_UNIT);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        whole
    } else {
        format!("{}.{}", whole, frac)
    }
}

fn add_thousand_separators(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
