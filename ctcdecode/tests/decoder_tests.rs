use ctcdecode_lib::alphabet::ConfigAlphabet;
use ctcdecode_lib::decoder::{ctc_beam_search_decoder, log_sum_exp, DecoderError};
use ctcdecode_lib::{Alphabet, BeamSearchDecoder, DecoderConfig};
use ndarray::{arr2, Array2};

const A: u32 = 0;
const B: u32 = 1;

fn alphabet() -> Alphabet {
    Alphabet::Config(ConfigAlphabet::from_lines("a\nb\n \n"))
}

fn config(beam_size: usize) -> DecoderConfig {
    DecoderConfig {
        beam_size,
        num_processes: 1,
        ..Default::default()
    }
}

/// Deterministic pseudo-random distributions over `class_dim` classes.
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

#[test]
fn blank_separated_labels_emit_both_tokens() {
    let _ = env_logger::builder().is_test(true).try_init();
    let probs = arr2(&[
        [0.8, 0.05, 0.05, 0.1],
        [0.05, 0.05, 0.05, 0.85],
        [0.05, 0.8, 0.05, 0.1],
    ]);
    let outputs = ctc_beam_search_decoder(probs.view(), &alphabet(), &config(10), None).unwrap();

    let best = &outputs[0];
    assert_eq!(best.tokens, vec![A, B]);
    assert_eq!(best.timesteps, vec![0, 2]);
    assert_eq!(best.text(&alphabet()), "ab");
}

#[test]
fn repeated_label_without_blank_collapses() {
    let probs = arr2(&[
        [0.8, 0.05, 0.05, 0.1],
        [0.7, 0.05, 0.05, 0.2],
        [0.1, 0.05, 0.05, 0.8],
    ]);
    let outputs = ctc_beam_search_decoder(probs.view(), &alphabet(), &config(10), None).unwrap();

    assert_eq!(outputs[0].tokens, vec![A]);
    assert_eq!(outputs[0].timesteps, vec![0]);
}

#[test]
fn repeated_label_across_blank_emits_two_tokens() {
    let probs = arr2(&[
        [0.8, 0.05, 0.05, 0.1],
        [0.05, 0.05, 0.05, 0.85],
        [0.75, 0.05, 0.05, 0.15],
    ]);
    let outputs = ctc_beam_search_decoder(probs.view(), &alphabet(), &config(10), None).unwrap();

    assert_eq!(outputs[0].tokens, vec![A, A]);
    assert_eq!(outputs[0].timesteps, vec![0, 2]);
}

#[test]
fn beam_never_exceeds_beam_size_and_scores_are_log_probabilities() {
    let probs = noisy_probs(12, 4, 7);
    let mut decoder = BeamSearchDecoder::new(&alphabet(), 4, &config(3), None).unwrap();

    for t in 0..probs.nrows() {
        decoder
            .next(probs.slice(ndarray::s![t..t + 1, ..]))
            .unwrap();
        assert!(decoder.beam().count() <= 3);
        for node in decoder.beam() {
            assert!(node.exists());
            assert_eq!(
                node.score,
                log_sum_exp(node.log_prob_b_prev, node.log_prob_nb_prev)
            );
            assert!(node.score <= 1e-6, "score {} is not a log probability", node.score);
        }
    }
    assert_eq!(decoder.time_step(), 12);
}

#[test]
fn beam_search_matches_exact_prefix_probability_with_wide_beam() {
    // With no pruning the beam holds every prefix, so the empty prefix must
    // carry exactly the all-blank path probability.
    let probs = noisy_probs(4, 4, 11);
    let mut decoder = BeamSearchDecoder::new(&alphabet(), 4, &config(1000), None).unwrap();
    decoder.next(probs.view()).unwrap();

    let all_blank: f64 = probs.column(3).iter().map(|p| p.ln()).sum();
    let root = decoder.trie().root();
    let root_score = decoder.trie().node(root).score as f64;
    assert!((root_score - all_blank).abs() < 1e-4);

    let total: f64 = decoder.beam().map(|n| (n.score as f64).exp()).sum();
    assert!((total - 1.0).abs() < 1e-3, "prefix probabilities sum to {total}");
}

#[test]
fn chunked_decoding_matches_single_call() {
    let probs = noisy_probs(10, 4, 3);
    let cfg = DecoderConfig {
        top_paths: 3,
        ..config(4)
    };

    let mut whole = BeamSearchDecoder::new(&alphabet(), 4, &cfg, None).unwrap();
    whole.next(probs.view()).unwrap();

    let mut chunked = BeamSearchDecoder::new(&alphabet(), 4, &cfg, None).unwrap();
    chunked.next(probs.slice(ndarray::s![..4, ..])).unwrap();
    let midway = chunked.decode();
    assert!(!midway.is_empty());
    chunked.next(probs.slice(ndarray::s![4.., ..])).unwrap();

    assert_eq!(whole.decode(), chunked.decode());
}

#[test]
fn without_scorer_confidence_is_raw_ctc_score() {
    let probs = noisy_probs(6, 4, 5);
    let mut decoder = BeamSearchDecoder::new(&alphabet(), 4, &config(8), None).unwrap();
    decoder.next(probs.view()).unwrap();

    let best_score = decoder
        .beam()
        .map(|n| n.score)
        .fold(f32::NEG_INFINITY, f32::max);
    let outputs = decoder.decode();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].approx_ctc(), best_score as f64);
}

#[test]
fn top_paths_are_sorted_best_first() {
    let probs = noisy_probs(5, 4, 9);
    let cfg = DecoderConfig {
        top_paths: 5,
        ..config(10)
    };
    let outputs = ctc_beam_search_decoder(probs.view(), &alphabet(), &cfg, None).unwrap();
    assert_eq!(outputs.len(), 5);
    for pair in outputs.windows(2) {
        assert!(pair[0].confidence >= pair[1].confidence);
    }
    for output in &outputs {
        assert_eq!(output.tokens.len(), output.timesteps.len());
        assert!(output.timesteps.iter().all(|&t| t < 5));
    }
}

#[test]
fn decode_before_any_frame_yields_empty_hypothesis() {
    let decoder = BeamSearchDecoder::new(&alphabet(), 4, &config(4), None).unwrap();
    let outputs = decoder.decode();
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].tokens.is_empty());
    assert_eq!(outputs[0].confidence, 0.0);
}

#[test]
fn class_dim_mismatch_is_rejected_at_init() {
    let err = BeamSearchDecoder::new(&alphabet(), 5, &config(4), None).unwrap_err();
    assert!(matches!(
        err,
        DecoderError::ClassDimMismatch {
            expected: 4,
            actual: 5
        }
    ));
}

#[test]
fn chunk_with_wrong_width_is_rejected() {
    let mut decoder = BeamSearchDecoder::new(&alphabet(), 4, &config(4), None).unwrap();
    let err = decoder.next(noisy_probs(2, 3, 1).view()).unwrap_err();
    assert!(matches!(err, DecoderError::ClassDimMismatch { .. }));
    assert_eq!(decoder.time_step(), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let err = BeamSearchDecoder::new(&alphabet(), 4, &config(0), None).unwrap_err();
    assert!(matches!(err, DecoderError::Config(_)));
}

#[test]
fn token_timestep_tracks_most_probable_frame() {
    let probs = arr2(&[
        [0.6, 0.05, 0.05, 0.3],
        [0.8, 0.05, 0.05, 0.1],
        [0.1, 0.05, 0.05, 0.8],
    ]);
    let outputs = ctc_beam_search_decoder(probs.view(), &alphabet(), &config(10), None).unwrap();

    assert_eq!(outputs[0].tokens, vec![A]);
    assert_eq!(outputs[0].timesteps, vec![1]);
}
