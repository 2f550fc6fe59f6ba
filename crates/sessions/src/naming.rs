//! Adjective-noun name generation for projects and branches.

use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brisk", "calm", "clever", "copper", "crimson", "dusty",
    "eager", "fleet", "gentle", "golden", "hazel", "keen", "lively", "lunar",
    "mellow", "nimble", "quiet", "rapid", "rustic", "silent", "silver", "solar",
    "swift", "tidal", "vivid", "wandering", "wild", "witty",
];

const NOUNS: &[&str] = &[
    "badger", "bluff", "canyon", "cedar", "comet", "condor", "coyote", "dune",
    "falcon", "fern", "glacier", "harbor", "heron", "kestrel", "lagoon", "marmot",
    "mesa", "meadow", "osprey", "otter", "pinyon", "prairie", "raven", "ridge",
    "saguaro", "sparrow", "summit", "thicket", "wren", "yucca",
];

/// Generate a random `adjective-noun` name.
pub fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap_or(&"amber");
    let noun = NOUNS.choose(&mut rng).unwrap_or(&"falcon");
    format!("{adjective}-{noun}")
}
