use crate::models::{Chapter, Reciter};
use unicode_normalization::UnicodeNormalization;

pub fn norm_key(s: &str) -> String {
    s.nfkd().filter(|c| c.is_ascii()).collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

pub fn slugify(s: &str) -> String {
    let mut out = String::new();
    let mut dash = false;
    for ch in s.nfkd().flat_map(|c| c.to_lowercase()) {
        if ch.is_ascii_alphanumeric() { out.push(ch); dash = false; }
        else if !dash && ch.is_ascii() { out.push('-'); dash = true; }
    }
    out.trim_matches('-').to_string()
}

// resolve using SERVER names, not the user's spelling
pub fn resolve_chapter<'a>(chapters: &'a [Chapter], query: &str) -> Option<&'a Chapter> {
    if let Ok(n) = query.trim().parse::<u32>() { return chapters.iter().find(|c| c.id == n); }
    let key = norm_key(query);
    if key.is_empty() { return None; }
    chapters.iter().find(|c| norm_key(&c.name_simple) == key
        || norm_key(&c.name_complex) == key)
}

pub fn resolve_reciter<'a>(reciters: &'a [Reciter], query: &str) -> Option<&'a Reciter> {
    if let Ok(n) = query.trim().parse::<u32>() { return reciters.iter().find(|r| r.id == n); }
    let key = norm_key(query);
    if key.is_empty() { return None; }
    // "name + style" is exact, so it wins over partial name matches
    reciters.iter()
        .find(|r| {
            let s = r.style.as_deref().map(norm_key).unwrap_or_default();
            !s.is_empty() && format!("{}{s}", norm_key(&r.reciter_name)) == key
        })
        .or_else(|| reciters.iter().find(|r| {
            let n = norm_key(&r.reciter_name);
            !n.is_empty() && (n.contains(&key) || key.contains(&n))
        }))
}

/// Folder name for one reciter's downloads, style included so murattal and
/// mujawwad recordings of the same reciter don't collide.
pub fn reciter_slug(r: &Reciter) -> String {
    match r.style.as_deref().filter(|s| !s.is_empty()) {
        Some(style) => format!("{}-{}", slugify(&r.reciter_name), slugify(style)),
        None => slugify(&r.reciter_name),
    }
}
