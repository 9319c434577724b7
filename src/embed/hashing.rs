use crate::apis::Paper;

pub const EMBEDDING_DIMENSION: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a, stable across builds so stored vectors stay comparable.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// Embed text by signed feature hashing of its lower-cased word tokens.
///
/// Texts sharing vocabulary end up close in cosine/L2 distance. The result is
/// L2-normalised; text without tokens maps to the zero vector.
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIMENSION];
    let lowered = text.to_lowercase();
    for token in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
    {
        let hash = fnv1a(token.as_bytes());
        let bucket = (hash % EMBEDDING_DIMENSION as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

pub fn embed_paper(paper: &Paper) -> Vec<f32> {
    embed_text(&format!("{} {}", paper.title, paper.abstract_text))
}
