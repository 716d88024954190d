//! Built-in starter ruleset used when no keyword file is configured.
//!
//! Every positive rule is bound to the `alert` bucket; negative rules carry no
//! bucket.

use super::{normalize_rules, KeywordRule, Polarity, StatBucket};

const POSITIVE_SYMBOLS: &[&str] = &[
    "🥒", "☘", "🚓", "🚔", "🌝", "👍", "🍆", "🥦", "✅", "🟢", "⛔️", "☀️", "😡", "🌼", "🫒",
    "🟥", "🚨", "🛑", "🌞", "👌", "❌", "🪀", "🌳", "👹", "💚", "🤬", "🧶", "🌵", "🚓", "🚧",
    "🐸", "👮‍♂",
];

const POSITIVE_WORDS: &[&str] = &[
    "грязно", "cалатовый", "грязь", "крепят", "крепять", "Ямы", "Тучи", "чисто", "чистота",
    "чист", "чистый", "чизт", "тихо", "норм", "в норме", "ок", "ok", "ухилянт", "упаковали",
    "пресуют", "пресують", "пакуют", "катаются", "проверка", "пешие", "внимание", "осторожно",
    "черти", "гнили", "гниль",
];

const POSITIVE_PATTERNS: &[&str] = &[r"на[\s]+военных[\s]+номерах", r"воины[\s]+добра"];

const NEGATIVE_LITERALS: &[&str] = &[
    "?", "¿", "съебётся", "бля", "желательно", "а какой", "в ахуе", "пох", "если", "чево",
    "чего", "шотак", "нахуй", "блэт", "вайб", "почему", "долбоеб", "далбаеб", "хуй", "пидар",
    "вобщем", "меня", "долго", "знакомого", "говорили", "мне", "заебал", "каждому",
    "чувствовал", "бежать", "для", "даже", "фильм", "актёры", "вариант", "развлекайся",
    "перерва", "пиво", "водка", "водки", "ты", "договор", "фух",
];

const NEGATIVE_PATTERNS: &[&str] = &[r"буду[\s]знать", r"потому[\s]что", r"перед[\s]тем"];

pub const ALERT_BUCKET: &str = "alert";

pub fn default_buckets() -> Vec<StatBucket> {
    [("blue", "#3b82f6"), ("green", "#22c55e"), (ALERT_BUCKET, "#ef4444")]
        .iter()
        .enumerate()
        .map(|(i, (name, color))| StatBucket {
            id: i as i64 + 1,
            name: (*name).to_string(),
            color: (*color).to_string(),
        })
        .collect()
}

pub fn default_rules() -> Vec<KeywordRule> {
    let positive_literals = POSITIVE_SYMBOLS.iter().chain(POSITIVE_WORDS);
    let mut rules: Vec<KeywordRule> = positive_literals
        .map(|k| KeywordRule::literal(0, *k, Polarity::Positive).in_bucket(ALERT_BUCKET))
        .collect();
    rules.extend(
        POSITIVE_PATTERNS
            .iter()
            .map(|p| KeywordRule::regex(0, *p, Polarity::Positive).in_bucket(ALERT_BUCKET)),
    );
    rules.extend(
        NEGATIVE_LITERALS
            .iter()
            .map(|k| KeywordRule::literal(0, *k, Polarity::Negative)),
    );
    rules.extend(
        NEGATIVE_PATTERNS
            .iter()
            .map(|p| KeywordRule::regex(0, *p, Polarity::Negative)),
    );
    normalize_rules(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_unique_and_positive_rules_feed_alert() {
        let rules = default_rules();
        let mut kws: Vec<_> = rules.iter().map(|r| r.keyword.as_str()).collect();
        let before = kws.len();
        kws.sort();
        kws.dedup();
        assert_eq!(before, kws.len());
        assert!(rules
            .iter()
            .filter(|r| r.polarity == Polarity::Positive)
            .all(|r| r.stat_bucket.as_deref() == Some(ALERT_BUCKET)));
        assert!(rules
            .iter()
            .filter(|r| r.polarity == Polarity::Negative)
            .all(|r| r.stat_bucket.is_none()));
    }
}
