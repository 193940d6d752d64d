use std::collections::HashSet;

/// "Email Address:" -> "email_address". `None` when nothing alphanumeric is left.
pub fn snake_case_id(text: &str) -> Option<String> {
    let mut id = String::with_capacity(text.len());
    let mut pending_sep = false;

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !id.is_empty() {
                id.push('_');
            }
            pending_sep = false;
            id.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }

    if id.is_empty() { None } else { Some(id) }
}

/// Trim and collapse runs of whitespace. `None` for blank text.
pub fn clean_label(raw: &str) -> Option<String> {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() { None } else { Some(text) }
}

/// Dice coefficient over character bigrams of the normalized texts, in [0, 1].
///
/// Normalization drops case, punctuation and spacing so "Sign In" and
/// "sign-in" compare equal.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = squash(a);
    let b = squash(b);

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let ba = bigrams(&a);
    let bb = bigrams(&b);
    if ba.is_empty() || bb.is_empty() {
        return 0.0;
    }

    let mut remaining = bb.clone();
    let mut shared = 0usize;
    for pair in &ba {
        if let Some(pos) = remaining.iter().position(|p| p == pair) {
            remaining.swap_remove(pos);
            shared += 1;
        }
    }

    2.0 * shared as f64 / (ba.len() + bb.len()) as f64
}

fn squash(text: &str) -> Vec<char> {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn bigrams(chars: &[char]) -> Vec<(char, char)> {
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Hands out ids unique within one map. The first claim of a base keeps it,
/// later ones get `_2`, `_3`, ... in claim order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    taken: HashSet<String>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, base: &str) -> String {
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }

        let mut n = 2usize;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
