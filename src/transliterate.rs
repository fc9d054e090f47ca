//! Kana to Hepburn-style romaji.
//!
//! Katakana is folded onto hiragana first, so both scripts share one table.
//! Kanji and anything else without a reading pass through untouched.

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransliterationError {
    #[error("voicing mark at position {position} has no kana to attach to")]
    StrayVoicingMark { position: usize },
}

/// Phonetic rendering of `text`. Never fails: if the input cannot be
/// romanized it is returned unchanged.
pub fn transliterate(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }
    match romanize(text) {
        Ok(romaji) => romaji,
        Err(err) => {
            debug!("transliteration fell back to source text: {}", err);
            text.to_string()
        }
    }
}

pub fn romanize(text: &str) -> Result<String, TransliterationError> {
    let chars = normalize(text)?;
    Ok(render(&syllables(&chars)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Unit {
    Syllable(String),
    Sokuon,
    MoraicN,
    LongVowel,
    Other(String),
}

const COMBINING_DAKUTEN: char = '\u{3099}';
const COMBINING_HANDAKUTEN: char = '\u{309A}';
const SPACING_DAKUTEN: char = '\u{309B}';
const SPACING_HANDAKUTEN: char = '\u{309C}';

fn normalize(text: &str) -> Result<Vec<char>, TransliterationError> {
    let mut out: Vec<char> = Vec::with_capacity(text.len());
    for (position, ch) in text.chars().enumerate() {
        let semi = match ch {
            COMBINING_DAKUTEN | SPACING_DAKUTEN => false,
            COMBINING_HANDAKUTEN | SPACING_HANDAKUTEN => true,
            _ => {
                out.push(fold_katakana(ch));
                continue;
            }
        };
        let composed = out
            .last()
            .and_then(|base| compose_voicing(*base, semi))
            .ok_or(TransliterationError::StrayVoicingMark { position })?;
        if let Some(last) = out.last_mut() {
            *last = composed;
        }
    }
    Ok(out)
}

fn fold_katakana(ch: char) -> char {
    if ('\u{30A1}'..='\u{30F6}').contains(&ch) {
        char::from_u32(ch as u32 - 0x60).unwrap_or(ch)
    } else {
        ch
    }
}

fn compose_voicing(base: char, semi: bool) -> Option<char> {
    const VOICEABLE: &str = "かきくけこさしすせそたちつてとはひふへほ";
    const SEMI_VOICEABLE: &str = "はひふへほ";
    if semi {
        if SEMI_VOICEABLE.contains(base) {
            return char::from_u32(base as u32 + 2);
        }
        return None;
    }
    if base == 'う' {
        return Some('ゔ');
    }
    if VOICEABLE.contains(base) {
        return char::from_u32(base as u32 + 1);
    }
    None
}

fn syllables(chars: &[char]) -> Vec<Unit> {
    let mut units = Vec::with_capacity(chars.len());
    let mut idx = 0;
    while idx < chars.len() {
        let ch = chars[idx];
        match ch {
            'っ' => units.push(Unit::Sokuon),
            'ん' => units.push(Unit::MoraicN),
            'ー' => units.push(Unit::LongVowel),
            _ => match kana_romaji(ch) {
                Some(base) => {
                    if let Some(next) = chars.get(idx + 1).copied()
                        && let Some(combined) = combine(base, next)
                    {
                        units.push(Unit::Syllable(combined));
                        idx += 2;
                        continue;
                    }
                    units.push(Unit::Syllable(base.to_string()));
                }
                None => units.push(Unit::Other(punctuation(ch))),
            },
        }
        idx += 1;
    }
    units
}

fn render(units: &[Unit]) -> String {
    let mut out = String::new();
    for (idx, unit) in units.iter().enumerate() {
        let next = match units.get(idx + 1) {
            Some(Unit::Syllable(next)) => Some(next.as_str()),
            _ => None,
        };
        match unit {
            Unit::Syllable(romaji) => out.push_str(romaji),
            Unit::Sokuon => {
                // geminate the following consonant; a trailing sokuon is silent
                if let Some(next) = next {
                    if next.starts_with("ch") {
                        out.push('t');
                    } else if let Some(first) = next.chars().next()
                        && !is_vowel(first)
                        && first != 'n'
                    {
                        out.push(first);
                    }
                }
            }
            Unit::MoraicN => {
                out.push('n');
                if let Some(next) = next
                    && next.starts_with(|c: char| is_vowel(c) || c == 'y')
                {
                    out.push('\'');
                }
            }
            Unit::LongVowel => {
                if let Some(last) = out.chars().last()
                    && is_vowel(last)
                {
                    out.push(last);
                }
            }
            Unit::Other(value) => out.push_str(value),
        }
    }
    out
}

fn combine(base: &str, small: char) -> Option<String> {
    match small {
        'ゃ' | 'ゅ' | 'ょ' => {
            let vowel = &kana_romaji(small)?[1..];
            let stem = base.strip_suffix('i')?;
            if matches!(base, "shi" | "chi" | "ji") {
                Some(format!("{}{}", stem, vowel))
            } else if !stem.is_empty() {
                Some(format!("{}y{}", stem, vowel))
            } else {
                None
            }
        }
        'ぁ' | 'ぃ' | 'ぅ' | 'ぇ' | 'ぉ' => {
            let vowel = kana_romaji(small)?;
            match (base, vowel) {
                ("fu" | "vu", _) => Some(format!("{}{}", &base[..1], vowel)),
                ("te" | "de", "i") | ("to" | "do", "u") => {
                    Some(format!("{}{}", &base[..1], vowel))
                }
                ("u", "i" | "e" | "o") => Some(format!("w{}", vowel)),
                ("shi" | "chi" | "ji", "e") => Some(format!("{}e", &base[..base.len() - 1])),
                ("tsu", _) => Some(format!("ts{}", vowel)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn is_vowel(ch: char) -> bool {
    matches!(ch, 'a' | 'i' | 'u' | 'e' | 'o')
}

fn punctuation(ch: char) -> String {
    let mapped = match ch {
        '。' => ".",
        '、' => ",",
        '！' => "!",
        '？' => "?",
        '「' | '」' | '『' | '』' => "\"",
        '・' | '\u{3000}' => " ",
        '…' => "...",
        '～' | '〜' => "~",
        _ => return ch.to_string(),
    };
    mapped.to_string()
}

fn kana_romaji(ch: char) -> Option<&'static str> {
    let romaji = match ch {
        'あ' => "a",
        'い' => "i",
        'う' => "u",
        'え' => "e",
        'お' => "o",
        'か' => "ka",
        'き' => "ki",
        'く' => "ku",
        'け' => "ke",
        'こ' => "ko",
        'が' => "ga",
        'ぎ' => "gi",
        'ぐ' => "gu",
        'げ' => "ge",
        'ご' => "go",
        'さ' => "sa",
        'し' => "shi",
        'す' => "su",
        'せ' => "se",
        'そ' => "so",
        'ざ' => "za",
        'じ' => "ji",
        'ず' => "zu",
        'ぜ' => "ze",
        'ぞ' => "zo",
        'た' => "ta",
        'ち' => "chi",
        'つ' => "tsu",
        'て' => "te",
        'と' => "to",
        'だ' => "da",
        'ぢ' => "ji",
        'づ' => "zu",
        'で' => "de",
        'ど' => "do",
        'な' => "na",
        'に' => "ni",
        'ぬ' => "nu",
        'ね' => "ne",
        'の' => "no",
        'は' => "ha",
        'ひ' => "hi",
        'ふ' => "fu",
        'へ' => "he",
        'ほ' => "ho",
        'ば' => "ba",
        'び' => "bi",
        'ぶ' => "bu",
        'べ' => "be",
        'ぼ' => "bo",
        'ぱ' => "pa",
        'ぴ' => "pi",
        'ぷ' => "pu",
        'ぺ' => "pe",
        'ぽ' => "po",
        'ま' => "ma",
        'み' => "mi",
        'む' => "mu",
        'め' => "me",
        'も' => "mo",
        'や' | 'ゃ' => "ya",
        'ゆ' | 'ゅ' => "yu",
        'よ' | 'ょ' => "yo",
        'ら' => "ra",
        'り' => "ri",
        'る' => "ru",
        'れ' => "re",
        'ろ' => "ro",
        'わ' | 'ゎ' => "wa",
        'ゐ' => "i",
        'ゑ' => "e",
        'を' => "o",
        'ゔ' => "vu",
        'ぁ' => "a",
        'ぃ' => "i",
        'ぅ' => "u",
        'ぇ' => "e",
        'ぉ' => "o",
        'ゕ' => "ka",
        'ゖ' => "ke",
        _ => return None,
    };
    Some(romaji)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_kana() {
        assert_eq!(transliterate("こんにちは"), "konnichiha");
        assert_eq!(transliterate("カタカナ"), "katakana");
        assert_eq!(transliterate("さようなら"), "sayounara");
    }

    #[test]
    fn digraphs_and_extended_katakana() {
        assert_eq!(transliterate("きょう"), "kyou");
        assert_eq!(transliterate("しゃしん"), "shashin");
        assert_eq!(transliterate("ファイト"), "faito");
        assert_eq!(transliterate("パーティー"), "paatii");
    }

    #[test]
    fn gemination_and_long_vowels() {
        assert_eq!(transliterate("がっこう"), "gakkou");
        assert_eq!(transliterate("まっちゃ"), "matcha");
        assert_eq!(transliterate("ラーメン"), "raamen");
        assert_eq!(transliterate("あっ！"), "a!");
    }

    #[test]
    fn syllabic_n_before_vowels() {
        assert_eq!(transliterate("しんいち"), "shin'ichi");
        assert_eq!(transliterate("こんや"), "kon'ya");
    }

    #[test]
    fn kanji_and_latin_pass_through() {
        assert_eq!(transliterate("東京へ"), "東京he");
        assert_eq!(transliterate("OK、いいよ。"), "OK,iiyo.");
    }

    #[test]
    fn combining_marks_compose() {
        assert_eq!(transliterate("か\u{3099}んは\u{309A}れ"), "ganpare");
        assert_eq!(transliterate("ウ\u{309B}ァ"), "va");
    }

    #[test]
    fn stray_marks_fall_back_to_source() {
        let source = "\u{3099}あ";
        assert!(romanize(source).is_err());
        assert_eq!(transliterate(source), source);
    }

    #[test]
    fn empty_in_empty_out() {
        assert_eq!(transliterate(""), "");
        assert_eq!(transliterate("  "), "");
    }
}
