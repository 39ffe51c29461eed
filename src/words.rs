/// Curated word lists for passphrase and device name generation
///
/// Passphrase words contain neither `-` (the word joiner) nor `:` (the
/// secret/factor separator), so a submitted identifier always splits
/// unambiguously.

/// Pool for generated login passphrases
pub const PASSPHRASE_WORDS: &[&str] = &[
    "acorn", "alpine", "amber", "anchor", "antler", "apricot", "arrow", "aspen", "atlas",
    "aurora", "badger", "bamboo", "barley", "basalt", "beacon", "birch", "bison", "blizzard",
    "bluff", "bramble", "brook", "burrow", "canyon", "caribou", "cedar", "cinder", "citrus",
    "clover", "cobalt", "comet", "condor", "coral", "cosmos", "crag", "crater", "crocus",
    "cypress", "dapple", "delta", "drift", "dusk", "eagle", "ember", "ermine", "falcon",
    "fennel", "fern", "fjord", "flint", "forest", "fossil", "foxglove", "gale", "garnet",
    "geyser", "ginger", "glacier", "glade", "granite", "grove", "gull", "harbor", "hawthorn",
    "hazel", "heather", "heron", "hollow", "ibex", "icicle", "indigo", "iris", "ivory",
    "jasper", "juniper", "kelp", "kestrel", "lagoon", "lantern", "larch", "lark", "lichen",
    "lilac", "linden", "lotus", "lynx", "magma", "mallow", "maple", "marble", "marmot",
    "meadow", "mesa", "mink", "mistral", "monsoon", "moraine", "moss", "myrtle", "nectar",
    "nettle", "nimbus", "oasis", "obsidian", "ocelot", "onyx", "opal", "orchid", "osprey",
    "otter", "pebble", "pinecone", "plume", "pollen", "prairie", "puffin", "quartz", "raven",
    "reef", "ridge", "saffron", "sage", "sequoia", "sparrow", "summit", "thistle", "tundra",
    "walnut", "willow", "zephyr",
];

/// Adjectives for generated device names
pub const ADJECTIVES: &[&str] = &[
    "amber", "ancient", "bold", "brave", "bright", "calm", "clever", "cosmic", "crimson",
    "curious", "daring", "dawn", "dusty", "eager", "early", "fearless", "fleet", "frosty",
    "gentle", "gilded", "golden", "hidden", "humble", "keen", "lively", "lucky", "misty",
    "nimble", "noble", "patient", "polar", "proud", "quiet", "rapid", "rustic", "silent",
    "silver", "steady", "swift", "wild",
];

/// Nouns for generated device names
pub const NOUNS: &[&str] = &[
    "badger", "beacon", "bison", "condor", "cougar", "coyote", "crane", "falcon", "ferret",
    "finch", "gazelle", "heron", "ibis", "jackal", "kestrel", "lemur", "leopard", "lynx",
    "marmot", "marten", "moose", "narwhal", "ocelot", "orca", "osprey", "otter", "owl",
    "panther", "pelican", "puffin", "python", "raven", "salmon", "sparrow", "stoat", "swan",
    "tapir", "viper", "walrus", "wolf",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passphrase_words_have_no_separators() {
        for word in PASSPHRASE_WORDS {
            assert!(!word.contains('-'), "word {} contains joiner", word);
            assert!(!word.contains(':'), "word {} contains separator", word);
        }
    }

    #[test]
    fn test_word_lists_are_unique() {
        use std::collections::HashSet;

        let unique: HashSet<_> = PASSPHRASE_WORDS.iter().collect();
        assert_eq!(unique.len(), PASSPHRASE_WORDS.len());

        let unique: HashSet<_> = ADJECTIVES.iter().collect();
        assert_eq!(unique.len(), ADJECTIVES.len());

        let unique: HashSet<_> = NOUNS.iter().collect();
        assert_eq!(unique.len(), NOUNS.len());
    }
}
