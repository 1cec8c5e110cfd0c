/// Reply template rendering.
use rand::seq::SliceRandom;
use rand::Rng;

/// Reply used when a template category is empty
pub const FALLBACK_REPLY: &str = "操作完成";

/// Replaces every `{key}` with its value in one pass over the template,
/// so substituted values are never scanned again. Unknown placeholders
/// stay as-is.
pub fn render(template: &str, params: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            rest = tail;
            break;
        };
        let key = &tail[1..close];
        if key.contains('{') {
            // "{{key}": keep the first brace, retry from the next one
            out.push('{');
            rest = &tail[1..];
            continue;
        }
        match params.iter().find(|(name, _)| *name == key) {
            Some((_, value)) => out.push_str(value),
            None => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    out
}

/// Picks one template at random and renders it.
pub fn pick_and_render<R: Rng + ?Sized>(
    templates: &[String],
    params: &[(&str, String)],
    rng: &mut R,
) -> String {
    match templates.choose(rng) {
        Some(template) => render(template, params),
        None => FALLBACK_REPLY.to_string(),
    }
}
