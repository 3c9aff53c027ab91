use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ctcdecode_lib::alphabet::ConfigAlphabet;
use ctcdecode_lib::automaton::WordAutomaton;
use ctcdecode_lib::decoder::{log_sum_exp, DecoderError, NodeId, PathTrie};
use ctcdecode_lib::lm::ArpaModel;
use ctcdecode_lib::scorer::{ScorerError, FILE_VERSION, OOV_SCORE};
use ctcdecode_lib::{Alphabet, BeamSearchDecoder, DecoderConfig, Scorer};
use ndarray::{arr2, s, Array2};

const A: u32 = 0;
const B: u32 = 1;
const SPACE: u32 = 2;

const WORD_ARPA: &str = "\\data\\
ngram 1=5
ngram 2=3

\\1-grams:
-1.0\t<unk>
-99\t<s>\t-0.3
-0.7\t</s>
-0.5\tab\t-0.2
-0.6\tba\t-0.25

\\2-grams:
-0.2\t<s> ab
-0.3\tab ba
-0.1\tba </s>

\\end\\
";

const CHAR_ARPA: &str = "\\data\\
ngram 1=5
ngram 2=1

\\1-grams:
-99\t<s>
-0.7\t</s>
-0.3\ta\t-0.1
-0.4\tb
-1.0\t<unk>

\\2-grams:
-0.2\ta b

\\end\\
";

fn alphabet() -> Alphabet {
    Alphabet::Config(ConfigAlphabet::from_lines("a\nb\n \n"))
}

fn word_scorer(alpha: f64, beta: f64) -> Scorer {
    let lm = ArpaModel::parse(WORD_ARPA).expect("word model parses");
    Scorer::new(alpha, beta, Box::new(lm), alphabet()).expect("scorer builds")
}

fn char_scorer(alphabet: Alphabet) -> Scorer {
    let lm = ArpaModel::parse(CHAR_ARPA).expect("char model parses");
    Scorer::new(1.0, 0.0, Box::new(lm), alphabet).expect("scorer builds")
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "ctcdecode_{name}_{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

fn extend(trie: &mut PathTrie, from: NodeId, labels: &[u32]) -> NodeId {
    labels.iter().enumerate().fold(from, |node, (t, &label)| {
        trie.get_path_trie(node, label, t, -0.1, true, None).unwrap()
    })
}

fn words_of(text: &str) -> Vec<&str> {
    text.split(' ').filter(|w| !w.is_empty()).collect()
}

#[test]
fn mode_is_detected_from_vocabulary() {
    let words = word_scorer(0.5, 0.0);
    assert!(!words.is_character_based());
    assert!(words.dictionary().is_some());
    assert_eq!(words.max_order(), 2);

    let chars = char_scorer(alphabet());
    assert!(chars.is_character_based());
    assert!(chars.dictionary().is_none());
}

#[test]
fn conditional_probability_is_natural_log() {
    let scorer = word_scorer(0.5, 0.0);
    let expected = -0.3 / std::f64::consts::LOG10_E;
    assert!((scorer.get_log_cond_prob(&["ab", "ba"]) - expected).abs() < 1e-5);
    assert_eq!(scorer.get_log_cond_prob(&["ab", "zz"]), OOV_SCORE);
}

#[test]
fn sentence_probability_is_padded_with_start_and_end() {
    let scorer = word_scorer(0.5, 0.0);
    let expected = (-0.2 - 0.3 - 0.1) / std::f64::consts::LOG10_E;
    assert!((scorer.get_sent_log_prob(&["ab", "ba"]) - expected).abs() < 1e-5);
}

#[test]
fn split_labels_follows_mode() {
    let labels = [A, B, SPACE, B, A];
    assert_eq!(word_scorer(0.5, 0.0).split_labels(&labels), vec!["ab", "ba"]);
    assert_eq!(
        char_scorer(alphabet()).split_labels(&labels),
        vec!["a", "b", " ", "b", "a"]
    );
}

#[test]
fn make_ngram_walks_back_by_word_and_pads_at_root() {
    let scorer = word_scorer(0.5, 0.0);
    let mut trie = PathTrie::new();
    let root = trie.root();
    let ab = extend(&mut trie, root, &[A, B]);
    let tail = extend(&mut trie, ab, &[SPACE, B]);

    assert_eq!(scorer.make_ngram(&trie, tail), vec!["ab", "b"]);
    assert_eq!(scorer.make_ngram(&trie, ab), vec!["<s>", "ab"]);
    assert_eq!(scorer.make_ngram(&trie, root), vec!["<s>", "<s>"]);

    let space = trie.node(tail).parent().unwrap();
    assert_eq!(scorer.scoring_node(&trie, ab, space, SPACE), Some(ab));
    assert_eq!(scorer.scoring_node(&trie, space, tail, B), None);
}

#[test]
fn make_ngram_walks_back_by_character() {
    let scorer = char_scorer(alphabet());
    let mut trie = PathTrie::new();
    let root = trie.root();
    let a = extend(&mut trie, root, &[A]);
    let ab = extend(&mut trie, a, &[B]);

    assert_eq!(scorer.make_ngram(&trie, ab), vec!["a", "b"]);
    assert_eq!(scorer.make_ngram(&trie, a), vec!["<s>", "a"]);
    assert_eq!(scorer.scoring_node(&trie, a, ab, B), Some(ab));
}

#[test]
fn byte_mode_scores_only_complete_codepoints() {
    let alphabet = Alphabet::raw_bytes();
    let scorer = char_scorer(alphabet.clone());
    let labels = alphabet.encode("aé");
    assert_eq!(labels.len(), 3);

    let mut trie = PathTrie::new();
    let root = trie.root();
    let a = extend(&mut trie, root, &labels[..1]);
    let lead = extend(&mut trie, a, &labels[1..2]);
    let tail = extend(&mut trie, lead, &labels[2..]);

    assert_eq!(scorer.scoring_node(&trie, root, a, labels[0]), Some(a));
    assert_eq!(scorer.scoring_node(&trie, a, lead, labels[1]), None);
    assert_eq!(scorer.scoring_node(&trie, lead, tail, labels[2]), Some(tail));
    assert_eq!(scorer.make_ngram(&trie, tail), vec!["a", "é"]);
}

#[test]
fn automaton_is_minimal_and_deterministic() {
    // "ab " and "bb " share the suffix language after their first label.
    let dict = WordAutomaton::build([vec![1, 2, 3], vec![2, 2, 3]]).unwrap();
    assert_eq!(dict.num_states(), 4);
    assert!(dict.accepts(&[1, 2, 3]));
    assert!(dict.accepts(&[2, 2, 3]));
    assert!(!dict.accepts(&[1, 2]));
    assert!(!dict.accepts(&[3, 2, 3]));
    assert_eq!(dict.transition(dict.start_state(), 3), None);
}

#[test]
fn automaton_serialization_round_trips() {
    let dict = WordAutomaton::build([vec![1, 2, 3], vec![2, 1, 3], vec![1, 3]]).unwrap();
    let mut bytes = Vec::new();
    dict.write_to(&mut bytes);
    let (restored, used) = WordAutomaton::read_from(&bytes).unwrap();
    assert_eq!(restored, dict);
    assert_eq!(used, bytes.len());
    assert!(WordAutomaton::read_from(&bytes[..bytes.len() - 1]).is_err());
}

#[test]
fn package_round_trip_restores_mode_and_dictionary() {
    let scorer = word_scorer(0.5, 0.0);
    let bytes = scorer.serialize_package().unwrap();
    assert_eq!(&bytes[..4], b"EIRT");
    assert_eq!(&bytes[4..8], &FILE_VERSION.to_le_bytes());
    assert_eq!(bytes[8], 0);

    let lm = ArpaModel::parse(WORD_ARPA).unwrap();
    let restored = Scorer::with_package(0.5, 0.0, Box::new(lm), alphabet(), &bytes).unwrap();
    assert!(!restored.is_character_based());
    assert_eq!(restored.dictionary(), scorer.dictionary());
}

#[test]
fn package_with_bad_header_is_rejected() {
    let bytes = word_scorer(0.5, 0.0).serialize_package().unwrap();
    let load = |bytes: &[u8]| {
        let lm = ArpaModel::parse(WORD_ARPA).unwrap();
        Scorer::with_package(0.5, 0.0, Box::new(lm), alphabet(), bytes)
    };

    let mut bad_magic = bytes.clone();
    bad_magic[0] ^= 0xFF;
    assert!(matches!(load(&bad_magic), Err(ScorerError::BadMagic(_))));

    let mut bad_version = bytes.clone();
    bad_version[4] = bad_version[4].wrapping_add(1);
    assert!(matches!(
        load(&bad_version),
        Err(ScorerError::BadVersion { .. })
    ));

    assert!(matches!(load(&bytes[..6]), Err(ScorerError::Truncated(6))));
    assert!(matches!(
        load(&bytes[..bytes.len() - 2]),
        Err(ScorerError::Automaton(_))
    ));
}

#[test]
fn scorer_loads_from_files() {
    let _ = env_logger::builder().is_test(true).try_init();
    let lm_path = temp_path("lm.arpa");
    let package_path = temp_path("scorer.pkg");
    std::fs::write(&lm_path, WORD_ARPA).unwrap();

    let mut built = word_scorer(0.5, 0.0);
    built.fill_dictionary(["ab", "zz", "<unk>"]).unwrap();
    built.save_package(&package_path).unwrap();

    let loaded =
        Scorer::from_files(0.5, 0.0, &lm_path, Some(package_path.as_path()), alphabet()).unwrap();
    let _ = std::fs::remove_file(&lm_path);
    let _ = std::fs::remove_file(&package_path);

    let dict = loaded.dictionary().unwrap();
    assert!(dict.accepts(&[A + 1, B + 1, SPACE + 1]));
    assert!(!dict.accepts(&[B + 1, A + 1, SPACE + 1]));
}

fn noisy_probs(time_dim: usize, class_dim: usize, seed: u64) -> Array2<f64> {
    let mut state = seed;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((state >> 33) as f64 / (1u64 << 31) as f64) + 0.01
    };
    let mut probs = Array2::from_shape_fn((time_dim, class_dim), |_| next());
    for mut row in probs.rows_mut() {
        let sum: f64 = row.sum();
        row.mapv_inplace(|p| p / sum);
    }
    probs
}

/// Completed words must be dictionary words; a trailing partial word must
/// still be able to complete into one.
fn assert_in_dictionary(text: &str) {
    let words = words_of(text);
    let (last, complete) = if text.ends_with(' ') {
        (None, &words[..])
    } else {
        (words.last(), &words[..words.len().saturating_sub(1)])
    };
    for word in complete {
        assert!(["ab", "ba"].contains(word), "{word:?} is not in the dictionary");
    }
    if let Some(partial) = last {
        assert!(
            "ab".starts_with(partial) || "ba".starts_with(partial),
            "{partial:?} cannot complete to a dictionary word"
        );
    }
}

#[test]
fn word_mode_decoding_stays_inside_dictionary() {
    let scorer = Arc::new(word_scorer(0.5, 0.0));
    let cfg = DecoderConfig {
        beam_size: 16,
        top_paths: 4,
        num_processes: 1,
        ..Default::default()
    };

    // Acoustics favour "aa", which is not a prefix of any dictionary word.
    let probs = arr2(&[
        [0.8, 0.05, 0.05, 0.1],
        [0.05, 0.05, 0.05, 0.85],
        [0.75, 0.05, 0.05, 0.15],
    ]);
    let mut decoder = BeamSearchDecoder::new(&alphabet(), 4, &cfg, Some(scorer.clone())).unwrap();
    decoder.next(probs.view()).unwrap();

    for output in decoder.decode() {
        assert_in_dictionary(&output.text(&alphabet()));
    }
}

#[test]
fn full_beam_with_scorer_keeps_beam_invariants() {
    let scorer = Arc::new(word_scorer(0.8, 1.5));
    let cfg = DecoderConfig {
        beam_size: 2,
        cutoff_top_n: 3,
        num_processes: 1,
        ..Default::default()
    };

    for seed in 0..20 {
        let probs = noisy_probs(20, 4, seed);
        let mut decoder =
            BeamSearchDecoder::new(&alphabet(), 4, &cfg, Some(scorer.clone())).unwrap();
        let mut saw_full_beam = false;

        for t in 0..probs.nrows() {
            decoder.next(probs.slice(s![t..t + 1, ..])).unwrap();
            let prefixes = decoder.state().prefixes();
            assert!(prefixes.len() <= 2, "seed {seed}: beam holds {}", prefixes.len());
            saw_full_beam |= prefixes.len() == 2;

            for &id in prefixes {
                let node = decoder.trie().node(id);
                assert_eq!(
                    node.score,
                    log_sum_exp(node.log_prob_b_prev, node.log_prob_nb_prev)
                );
                let (mut tokens, mut timesteps) = (Vec::new(), Vec::new());
                decoder
                    .trie()
                    .get_path_vec(id, &mut tokens, &mut timesteps, None, usize::MAX);
                assert_in_dictionary(&alphabet().decode(&tokens));
            }
        }
        assert!(saw_full_beam, "seed {seed}: beam never filled");
        assert_eq!(decoder.decode().len(), 1);
    }
}

#[test]
fn scorer_on_another_alphabet_is_rejected_at_init() {
    let lm = ArpaModel::parse(CHAR_ARPA).unwrap();
    let narrow = Alphabet::Config(ConfigAlphabet::from_lines("a\nb\n"));
    let scorer = Arc::new(Scorer::new(1.0, 0.0, Box::new(lm), narrow).unwrap());

    let err = BeamSearchDecoder::new(&alphabet(), 4, &DecoderConfig::default(), Some(scorer))
        .unwrap_err();
    assert!(matches!(
        err,
        DecoderError::ScorerAlphabetMismatch {
            decoder: 3,
            scorer: 2
        }
    ));
}

#[test]
fn reset_params_changes_lm_bonus() {
    let mut scorer = word_scorer(0.5, 0.0);
    let ngram = ["<s>", "ab"];
    let before = scorer.lm_bonus(&ngram);

    scorer.reset_params(1.0, 2.0);
    assert_eq!((scorer.alpha, scorer.beta), (1.0, 2.0));
    let expected = scorer.get_log_cond_prob(&ngram) + 2.0;
    assert!((scorer.lm_bonus(&ngram) - expected).abs() < 1e-9);
    assert!(scorer.lm_bonus(&ngram) > before);
}

#[test]
fn word_mode_decoding_recovers_dictionary_words() {
    let scorer = Arc::new(word_scorer(0.5, 0.0));
    let cfg = DecoderConfig {
        beam_size: 16,
        num_processes: 1,
        ..Default::default()
    };
    let probs = arr2(&[
        [0.9, 0.03, 0.03, 0.04],
        [0.03, 0.9, 0.03, 0.04],
        [0.03, 0.03, 0.9, 0.04],
        [0.03, 0.9, 0.03, 0.04],
        [0.9, 0.03, 0.03, 0.04],
    ]);
    let mut decoder = BeamSearchDecoder::new(&alphabet(), 4, &cfg, Some(scorer)).unwrap();
    decoder.next(probs.view()).unwrap();

    let best = &decoder.decode()[0];
    assert_eq!(best.text(&alphabet()), "ab ba");
    assert_eq!(best.timesteps, vec![0, 1, 2, 3, 4]);
    assert!(best.confidence.is_finite());
}
