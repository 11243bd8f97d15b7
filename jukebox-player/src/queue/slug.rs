//! Slug allocation
//!
//! Slugs are short words handed to users so they can refer to their entries.
//! Words are drawn from a fixed list with rank-weighted probability
//! `1 / (rank + 1)^bias`, favouring the short words at the head of the list
//! while still reaching the tail. When a word is already taken by an active
//! entry, a numeric suffix is appended (`apple`, `apple-1`, `apple-2`, ...).

use super::QueueTx;
use jukebox_common::{Error, Result};
use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

/// Default rank bias; higher values concentrate on the head of the list
pub const DEFAULT_BIAS: f64 = 0.5;

/// Default number of candidate words tried before settling for a suffix
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Longest slug accepted from callers
pub const MAX_SLUG_LEN: usize = 64;

/// Candidate words, most memorable first
const WORDS: &[&str] = &[
    "cat", "dog", "sun", "sky", "owl", "fox", "bee", "elk", "yak", "ant",
    "cow", "pig", "hen", "ram", "eel", "jay", "emu", "gnu", "bat", "cod",
    "fig", "pea", "oak", "ivy", "elm", "gem", "ice", "ink", "jam", "kit",
    "map", "mug", "nut", "orb", "pen", "pie", "rug", "tea", "van", "web",
    "apple", "bread", "cloud", "daisy", "eagle", "flute", "grape", "honey",
    "igloo", "jelly", "koala", "lemon", "mango", "noodle", "olive", "panda",
    "quail", "river", "salsa", "tiger", "umbra", "viola", "whale", "xenon",
    "yacht", "zebra", "acorn", "bison", "cocoa", "dingo", "ember", "fjord",
    "gecko", "heron", "iris", "jewel", "kayak", "lotus", "maple", "nectar",
    "otter", "pecan", "quartz", "robin", "sable", "tulip", "urchin", "velvet",
    "walrus", "yodel", "zinnia", "almond", "banjo", "cactus", "dolphin",
    "falcon", "ginger", "hazel", "indigo", "jasmine", "kettle", "lagoon",
    "marble", "nutmeg", "orchid", "pepper", "quiver", "raven", "saffron",
    "thistle", "tundra", "violet", "willow", "yarrow", "zephyr", "anchor",
    "breeze", "canyon", "dune", "echo", "fable", "glacier", "harbor",
    "island", "jungle", "kernel", "lantern", "meadow", "nebula", "oasis",
    "pebble", "quasar", "ripple", "summit", "timber", "valley", "wander",
    "zenith", "biscuit", "crumpet", "dumpling", "eclair", "fondue",
    "gnocchi", "hotpot", "kimchi", "lasagna", "muffin", "pretzel", "risotto",
    "strudel", "truffle", "waffle",
];

/// Rank-weighted slug generator
#[derive(Debug, Clone)]
pub struct SlugAllocator {
    words: Vec<String>,
    cdf: Vec<f64>,
    max_attempts: usize,
}

impl SlugAllocator {
    /// Allocator over the built-in word list with default bias
    pub fn new() -> Self {
        let words = WORDS.iter().map(|w| w.to_string()).collect();
        Self::build(words, DEFAULT_BIAS)
    }

    /// Allocator over a custom word list
    ///
    /// Words must be non-empty lowercase ASCII letters so that suffixed
    /// variants (`word-N`) can be told apart from other words.
    pub fn with_words(words: Vec<String>, bias: f64) -> Result<Self> {
        if words.is_empty() {
            return Err(Error::Validation("Slug word list is empty".to_string()));
        }
        if let Some(bad) = words
            .iter()
            .find(|w| w.is_empty() || !w.chars().all(|c| c.is_ascii_lowercase()))
        {
            return Err(Error::Validation(format!("Invalid slug word: {:?}", bad)));
        }
        if !bias.is_finite() || bias < 0.0 {
            return Err(Error::Validation(format!("Invalid slug bias: {}", bias)));
        }
        Ok(Self::build(words, bias))
    }

    /// Bound on candidate words tried per allocation (at least one)
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn build(words: Vec<String>, bias: f64) -> Self {
        // PDF(i) = 1 / (i + 1)^bias, accumulated then normalized
        let mut cdf = Vec::with_capacity(words.len());
        let mut sum = 0.0;
        for i in 0..words.len() {
            sum += 1.0 / ((i + 1) as f64).powf(bias);
            cdf.push(sum);
        }
        for c in cdf.iter_mut() {
            *c /= sum;
        }

        Self {
            words,
            cdf,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Index of the word selected by a uniform sample `r` in `[0, 1)`
    fn index_for(&self, r: f64) -> usize {
        self.cdf
            .partition_point(|&c| c <= r)
            .min(self.words.len() - 1)
    }

    /// Draw a word without checking occupancy
    pub fn sample_word<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        &self.words[self.index_for(rng.gen::<f64>())]
    }

    /// Allocate a slug that no active entry currently holds
    ///
    /// Must run in the same unit of work as the insert that uses the slug.
    pub async fn next_slug(&self, tx: &mut QueueTx<'_>) -> Result<String> {
        let mut best: Option<(String, i64)> = None;

        for _ in 0..self.max_attempts {
            let word = self.sample_word(&mut rand::thread_rng()).to_string();
            let taken = tx.active_slug_variants(&word).await?;
            let occupied = occupancy(&word, &taken);

            if occupied == 0 {
                return Ok(word);
            }
            debug!("Slug '{}' occupied (next suffix {})", word, occupied);

            if best.as_ref().map_or(true, |(_, b)| occupied < *b) {
                best = Some((word, occupied));
            }
        }

        let (word, suffix) =
            best.ok_or_else(|| Error::Internal("No slug candidates drawn".to_string()))?;
        Ok(format!("{}-{}", word, suffix))
    }
}

impl Default for SlugAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Next free suffix for `word` given the active slugs that start with it
///
/// Returns 0 when the bare word is free, otherwise the smallest `N >= 1`
/// for which `word-N` is free.
pub fn occupancy(word: &str, taken: &[String]) -> i64 {
    let prefix = format!("{}-", word);
    let mut bare_taken = false;
    let mut suffixes = HashSet::new();

    for slug in taken {
        if slug == word {
            bare_taken = true;
        } else if let Some(n) = slug
            .strip_prefix(&prefix)
            .and_then(|rest| rest.parse::<i64>().ok())
        {
            suffixes.insert(n);
        }
    }

    if !bare_taken {
        return 0;
    }

    let mut n = 1;
    while suffixes.contains(&n) {
        n += 1;
    }
    n
}

/// Reject caller-supplied slugs that cannot have been allocated
pub fn validate_slug(slug: &str) -> Result<&str> {
    let well_formed = !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(slug)
    } else {
        Err(Error::Validation(format!("Malformed slug: {:?}", slug)))
    }
}
