// Transcript filters applied before a command is dispatched

/// Short utterances that never carry a command
pub const TRIVIAL_UTTERANCES: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "ok", "okay", "yes", "no",
];

/// Utterances at or above this length are never considered trivial
const TRIVIAL_MAX_LEN: usize = 10;

/// Punctuation accepted alongside ASCII letters, digits and whitespace
const ALLOWED_PUNCTUATION: &str = ".,!?'\"-:;()";

fn is_english_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c.is_whitespace() || ALLOWED_PUNCTUATION.contains(c)
}

/// Why a finalized transcript was not dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    NotEnglish,
    MostlyNonAscii,
    Trivial,
}

/// Language admission: English-pattern text with under 30% non-ASCII characters
pub fn admit(transcript: &str) -> Result<(), Rejection> {
    if transcript.is_empty() {
        return Err(Rejection::Empty);
    }

    let total = transcript.chars().count();
    let non_ascii = transcript.chars().filter(|c| !c.is_ascii()).count();
    if non_ascii * 10 >= total * 3 {
        return Err(Rejection::MostlyNonAscii);
    }

    if !transcript.chars().all(is_english_char) {
        return Err(Rejection::NotEnglish);
    }

    Ok(())
}

/// Greetings and acknowledgements too short to be commands
pub fn is_trivial(transcript: &str) -> bool {
    let lowered = transcript.trim().to_lowercase();
    lowered.len() < TRIVIAL_MAX_LEN && TRIVIAL_UTTERANCES.contains(&lowered.as_str())
}
