//! Cross-module scenarios that don't fit naturally in a single unit's
//! `#[cfg(test)]` module: training through to a saved model file, and the
//! cross-lingual fine-tune path's vocabulary swap.

use depgraph_parser::config::{OracleKind, ParserConfig};
use depgraph_parser::driver::{self, GoldArcs, TrainingExample};
use depgraph_parser::features::expected_num_tokens;
use depgraph_parser::model_io;
use depgraph_parser::sentence::{Sentence, Token};
use std::collections::HashMap;

fn toy_config() -> ParserConfig {
    let mut config = ParserConfig {
        labeled: true,
        delexicalized: false,
        oracle: OracleKind::ArcEager,
        language: "en".into(),
        use_postag: true,
        use_distance: true,
        use_valency: true,
        use_cluster: false,
        use_length: true,
        embedding_size: 4,
        distance_embedding_size: 2,
        valency_embedding_size: 2,
        cluster_embedding_size: 2,
        length_embedding_size: 2,
        hidden_size: 6,
        num_basic_tokens: 0,
        num_dist_tokens: 0,
        num_valency_tokens: 0,
        num_cluster_tokens: 0,
        num_length_tokens: 0,
        num_tokens: 0,
        num_pre_computed: 20,
        word_cut_off: 1,
        init_range: 0.01,
        max_iter: 5,
        finetune_iter: 3,
        eval_per_iter: 1,
        clear_gradient_per_iter: 0,
        save_intermediate: false,
        fix_word_embeddings: false,
        training_threads: 1,
        debug: false,
        root_label: "root".into(),
    };
    config.num_tokens = expected_num_tokens(&config);
    config
}

fn toy_examples() -> Vec<TrainingExample> {
    let sentence = Sentence::new(vec![
        Token::new("The", "DT"),
        Token::new("cat", "NN"),
        Token::new("sat", "VB"),
        Token::new("on", "IN"),
        Token::new("mat", "NN"),
    ]);
    let mut gold = GoldArcs::new(5);
    gold.add(1, 2, "det");
    gold.add(2, 3, "nsubj");
    gold.add(3, 0, "root");
    gold.add(4, 3, "prep");
    gold.add(5, 4, "pobj");
    vec![TrainingExample { sentence, gold }]
}

#[test]
fn trained_model_round_trips_through_save_and_load() {
    let config = toy_config();
    let examples = toy_examples();
    let outcome = driver::train(&config, &examples, &[], None, 5, None).unwrap();

    let mut buf = Vec::new();
    model_io::save(
        &mut buf,
        &outcome.config,
        &outcome.dict,
        &outcome.classifier,
        &outcome.precompute_ids,
    )
    .unwrap();

    let (reloaded_config, reloaded_dict, reloaded_classifier, reloaded_ids) =
        model_io::load(buf.as_slice()).unwrap();

    assert_eq!(reloaded_config.embedding_size, outcome.config.embedding_size);
    assert_eq!(reloaded_dict.words.size, outcome.dict.words.size);
    assert_eq!(reloaded_ids, outcome.precompute_ids);

    for word in outcome.dict.words.ordered_keys() {
        let local = outcome.dict.words.local_id(&word).unwrap();
        let reloaded_local = reloaded_dict.words.local_id(&word).unwrap();
        assert_eq!(
            outcome.classifier.word_embedding_row(local),
            reloaded_classifier.word_embedding_row(reloaded_local),
        );
    }
}

#[test]
fn same_seed_produces_bit_identical_saved_models() {
    let config = toy_config();
    let examples = toy_examples();

    let a = driver::train(&config, &examples, &[], None, 99, None).unwrap();
    let b = driver::train(&config, &examples, &[], None, 99, None).unwrap();

    let mut buf_a = Vec::new();
    let mut buf_b = Vec::new();
    model_io::save(&mut buf_a, &a.config, &a.dict, &a.classifier, &a.precompute_ids).unwrap();
    model_io::save(&mut buf_b, &b.config, &b.dict, &b.classifier, &b.precompute_ids).unwrap();

    assert_eq!(buf_a, buf_b);
}

#[test]
fn predict_on_a_longer_sentence_yields_a_complete_acyclic_graph() {
    let config = toy_config();
    let examples = toy_examples();
    let outcome = driver::train(&config, &examples, &[], None, 3, None).unwrap();

    // A sentence longer than anything the toy corpus trained on, so the
    // oracle path the network memorized won't apply directly and headless
    // repair is exercised for real.
    let sentence = Sentence::new(vec![
        Token::new("The", "DT"),
        Token::new("big", "JJ"),
        Token::new("cat", "NN"),
        Token::new("quickly", "RB"),
        Token::new("sat", "VB"),
        Token::new("on", "IN"),
        Token::new("the", "DT"),
        Token::new("old", "JJ"),
        Token::new("mat", "NN"),
    ]);

    let system = depgraph_parser::transition::ArcEagerSystem;
    let extractor = depgraph_parser::features::FeatureExtractor::new(&outcome.dict, &outcome.config);
    let kinds = depgraph_parser::features::slot_kinds(&outcome.config);
    let graph = driver::predict(&system, &extractor, &kinds, &outcome.classifier, &sentence, None);

    assert!(graph.is_complete(), "every token must end up with at least one head");
    for child in 1..=sentence.len() as u32 {
        for &(head, _) in graph.heads_of(child) {
            assert!(!graph.has_path_to(head, child), "repair must not introduce a cycle");
        }
    }
}

#[test]
fn finetune_replaces_the_word_vocabulary_but_keeps_sentinel_embeddings() {
    let config = toy_config();
    let examples = toy_examples();
    let base = driver::train(&config, &examples, &[], None, 1, None).unwrap();

    let mut model_bytes = Vec::new();
    model_io::save(
        &mut model_bytes,
        &base.config,
        &base.dict,
        &base.classifier,
        &base.precompute_ids,
    )
    .unwrap();

    // A target-language vocabulary disjoint from anything in the toy corpus.
    let target_words = ["gato", "perro", "casa", "arbol"];
    let mut source_embeddings: HashMap<String, Vec<f32>> = HashMap::new();
    for word in target_words {
        source_embeddings.insert(word.to_string(), vec![0.5f32; config.embedding_size]);
    }

    let (reloaded_config, reloaded_dict, reloaded_classifier, _) =
        model_io::load_cl(model_bytes.as_slice(), &source_embeddings).unwrap();

    assert_eq!(reloaded_dict.words.size as usize, target_words.len() + 3);
    assert!(reloaded_config.fix_word_embeddings);

    for word in target_words {
        assert!(reloaded_dict.words.local_id(word).is_some());
    }
    // The source-language words are gone; only the target vocabulary plus
    // the 3 sentinel rows remain.
    for word in base.dict.words.ordered_keys() {
        if word == depgraph_parser::dictionary::UNKNOWN
            || word == depgraph_parser::dictionary::NIL
            || word == depgraph_parser::dictionary::ROOT
        {
            continue;
        }
        assert!(reloaded_dict.words.local_id(&word).is_none());
    }

    // The three sentinel rows carry over their trained embedding values
    // rather than being reinitialized.
    for sentinel in [
        depgraph_parser::dictionary::UNKNOWN,
        depgraph_parser::dictionary::NIL,
        depgraph_parser::dictionary::ROOT,
    ] {
        let base_local = base.dict.words.local_id(sentinel).unwrap();
        let reloaded_local = reloaded_dict.words.local_id(sentinel).unwrap();
        assert_eq!(
            base.classifier.word_embedding_row(base_local),
            reloaded_classifier.word_embedding_row(reloaded_local),
        );
    }

    // The new target words took on the seeded embedding, not a random init.
    let gato_local = reloaded_dict.words.local_id("gato").unwrap();
    assert_eq!(reloaded_classifier.word_embedding_row(gato_local), vec![0.5f64; config.embedding_size].as_slice());
}

#[test]
fn finetune_runs_to_completion_over_the_swapped_vocabulary() {
    let config = toy_config();
    let examples = toy_examples();
    let base = driver::train(&config, &examples, &[], None, 2, None).unwrap();

    let mut model_bytes = Vec::new();
    model_io::save(
        &mut model_bytes,
        &base.config,
        &base.dict,
        &base.classifier,
        &base.precompute_ids,
    )
    .unwrap();

    let mut source_embeddings: HashMap<String, Vec<f32>> = HashMap::new();
    for word in ["le", "chat", "noir"] {
        source_embeddings.insert(word.to_string(), vec![0.1f32; config.embedding_size]);
    }

    let finetune_examples = {
        let sentence = Sentence::new(vec![
            Token::new("le", "DT"),
            Token::new("chat", "NN"),
            Token::new("noir", "JJ"),
        ]);
        let mut gold = GoldArcs::new(3);
        gold.add(1, 2, "det");
        gold.add(2, 0, "root");
        gold.add(3, 2, "amod");
        vec![TrainingExample { sentence, gold }]
    };

    let outcome = driver::finetune(&model_bytes, &source_embeddings, &finetune_examples, 4, None).unwrap();
    assert_eq!(outcome.dict.words.size as usize, 3 + 3);
}
