use std::collections::HashMap;

const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("canon", "Canon"),
    ("canon inc.", "Canon"),
    ("nikon", "Nikon"),
    ("nikon corporation", "Nikon"),
    ("sony", "Sony"),
    ("sony corporation", "Sony"),
    ("sony ericsson", "Sony Ericsson"),
    ("apple", "Apple"),
    ("samsung", "Samsung"),
    ("samsung techwin", "Samsung"),
    ("google", "Google"),
    ("fujifilm", "Fujifilm"),
    ("fuji photo film co., ltd.", "Fujifilm"),
    ("olympus", "Olympus"),
    ("olympus imaging corp.", "Olympus"),
    ("olympus corporation", "Olympus"),
    ("om digital solutions", "OM System"),
    ("panasonic", "Panasonic"),
    ("eastman kodak company", "Kodak"),
    ("kodak", "Kodak"),
    ("pentax", "Pentax"),
    ("pentax corporation", "Pentax"),
    ("ricoh imaging company, ltd.", "Ricoh"),
    ("ricoh", "Ricoh"),
    ("leica camera ag", "Leica"),
    ("leica", "Leica"),
    ("hasselblad", "Hasselblad"),
    ("gopro", "GoPro"),
    ("dji", "DJI"),
    ("huawei", "Huawei"),
    ("xiaomi", "Xiaomi"),
    ("oneplus", "OnePlus"),
    ("motorola", "Motorola"),
    ("lg electronics", "LG"),
    ("lge", "LG"),
    ("htc", "HTC"),
    ("hmd global", "Nokia"),
    ("nokia", "Nokia"),
    ("minolta co., ltd.", "Minolta"),
    ("konica minolta", "Konica Minolta"),
    ("sigma", "Sigma"),
];

// Longest first so "co., ltd." is tried before "ltd.".
const CORPORATE_SUFFIXES: &[&str] = &[
    "co., ltd.",
    "co.,ltd.",
    "co. ltd.",
    "co., ltd",
    "corporation",
    "company",
    "limited",
    "corp.",
    "corp",
    "inc.",
    "inc",
    "ltd.",
    "ltd",
    "llc",
    "gmbh",
    "plc",
    "co.",
    "ag",
];

/// Maps the many spellings camera firmware writes into one display name.
#[derive(Debug, Clone)]
pub struct ManufacturerStandardizer {
    aliases: HashMap<String, String>,
}

impl Default for ManufacturerStandardizer {
    fn default() -> Self {
        Self::new(&HashMap::new())
    }
}

impl ManufacturerStandardizer {
    /// Built-in aliases overlaid with `extra` (keys matched case-insensitively).
    pub fn new(extra: &HashMap<String, String>) -> Self {
        let mut aliases: HashMap<String, String> = DEFAULT_ALIASES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        for (k, v) in extra {
            aliases.insert(normalize_key(k), v.clone());
        }
        Self { aliases }
    }

    pub fn standardize(&self, raw: &str) -> String {
        let key = normalize_key(raw);
        if key.is_empty() {
            return String::new();
        }
        if let Some(name) = self.aliases.get(&key) {
            return name.clone();
        }

        let stripped = strip_suffixes(&key);
        if let Some(name) = self.aliases.get(stripped) {
            return name.clone();
        }
        let base = if stripped.is_empty() { key.as_str() } else { stripped };
        title_case(base)
    }
}

fn normalize_key(s: &str) -> String {
    s.trim()
        .trim_end_matches('\0')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn strip_suffixes(name: &str) -> &str {
    let mut current = name;
    loop {
        let before = current;
        for suffix in CORPORATE_SUFFIXES {
            if let Some(rest) = current.strip_suffix(suffix) {
                // Only strip whole words.
                if rest.is_empty() || rest.ends_with(' ') || rest.ends_with(',') {
                    current = rest.trim_end_matches(&[' ', ',', '.'][..]);
                    break;
                }
            }
        }
        if current == before {
            return current;
        }
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
