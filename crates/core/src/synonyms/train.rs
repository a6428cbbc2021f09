use super::model::{normalized, subword_buckets, SynonymModel};
use super::ContextSnapshot;
use crate::error::IngestError;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const MAX_EXP: f32 = 6.0;

#[derive(Debug, Clone)]
pub struct TrainingParams {
    pub vector_size: usize,
    pub window: usize,
    pub min_count: usize,
    pub epochs: usize,
    pub negative: usize,
    pub min_n: usize,
    pub max_n: usize,
    pub buckets: u32,
    pub learning_rate: f32,
    pub min_learning_rate: f32,
    pub seed: u64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            vector_size: 200,
            window: 5,
            min_count: 1,
            epochs: 10,
            negative: 5,
            min_n: 3,
            max_n: 6,
            buckets: 2_000_000,
            learning_rate: 0.025,
            min_learning_rate: 0.0001,
            seed: 1,
        }
    }
}

impl TrainingParams {
    fn validate(&self) -> Result<(), IngestError> {
        if self.vector_size == 0 || self.window == 0 || self.epochs == 0 || self.buckets == 0 {
            return Err(IngestError::InvalidArgument(
                "vector_size, window, epochs and buckets must be positive".to_string(),
            ));
        }
        if self.min_n == 0 || self.min_n > self.max_n {
            return Err(IngestError::InvalidArgument(format!(
                "invalid subword range {}..={}",
                self.min_n, self.max_n
            )));
        }
        Ok(())
    }
}

/// Trains a CBOW model with negative sampling over the snapshot.
///
/// Every vocabulary word is represented by its own input row plus the rows of
/// its hashed character n-grams; only the n-gram buckets that actually occur
/// get a row. Identical snapshots and params give identical models.
pub fn train(snapshot: &ContextSnapshot, params: &TrainingParams) -> Result<SynonymModel, IngestError> {
    params.validate()?;

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in snapshot.sentences().iter().flatten() {
        *counts.entry(token.as_str()).or_default() += 1;
    }

    let mut vocabulary = counts
        .into_iter()
        .filter(|(_, count)| *count >= params.min_count.max(1))
        .collect::<Vec<_>>();
    if vocabulary.is_empty() {
        return Err(IngestError::EmptyContext);
    }
    vocabulary.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));

    let word_ids: HashMap<&str, usize> = vocabulary
        .iter()
        .enumerate()
        .map(|(index, (word, _))| (*word, index))
        .collect();

    let word_buckets = vocabulary
        .iter()
        .map(|(word, _)| subword_buckets(word, params.min_n, params.max_n, params.buckets))
        .collect::<Vec<_>>();
    let ngram_buckets = word_buckets
        .iter()
        .flatten()
        .copied()
        .collect::<BTreeSet<u32>>()
        .into_iter()
        .collect::<Vec<_>>();
    let bucket_rows: HashMap<u32, usize> = ngram_buckets
        .iter()
        .enumerate()
        .map(|(index, bucket)| (*bucket, vocabulary.len() + index))
        .collect();

    // Row 0..V are words, V.. are n-grams; each word trains through all of them.
    let word_rows = word_buckets
        .iter()
        .enumerate()
        .map(|(word, buckets)| {
            let mut rows = vec![word];
            rows.extend(buckets.iter().filter_map(|bucket| bucket_rows.get(bucket).copied()));
            rows
        })
        .collect::<Vec<_>>();

    let sentences = snapshot
        .sentences()
        .iter()
        .map(|sentence| {
            sentence
                .iter()
                .filter_map(|token| word_ids.get(token.as_str()).copied())
                .collect::<Vec<_>>()
        })
        .filter(|sentence| !sentence.is_empty())
        .collect::<Vec<_>>();

    let dims = params.vector_size;
    let mut rng = StdRng::seed_from_u64(params.seed);
    let bound = 1.0 / dims as f32;
    let input_rows = vocabulary.len() + ngram_buckets.len();
    let mut input = (0..input_rows * dims)
        .map(|_| rng.gen_range(-bound..bound))
        .collect::<Vec<f32>>();
    let mut output = vec![0f32; vocabulary.len() * dims];

    let noise = WeightedIndex::new(vocabulary.iter().map(|(_, count)| (*count as f64).powf(0.75)))
        .map_err(|err| IngestError::InvalidArgument(format!("noise distribution: {err}")))?;

    let total_steps = (params.epochs * sentences.iter().map(Vec::len).sum::<usize>()).max(1);
    let mut step = 0usize;
    let mut hidden = vec![0f32; dims];
    let mut error = vec![0f32; dims];
    let mut context_rows = Vec::new();

    for _ in 0..params.epochs {
        for sentence in &sentences {
            for (position, &target) in sentence.iter().enumerate() {
                let progress = step as f32 / total_steps as f32;
                let lr = (params.learning_rate
                    - (params.learning_rate - params.min_learning_rate) * progress)
                    .max(params.min_learning_rate);
                step += 1;

                let reach = params.window - rng.gen_range(0..params.window);
                let start = position.saturating_sub(reach);
                let end = (position + reach + 1).min(sentence.len());

                context_rows.clear();
                for (offset, &word) in sentence[start..end].iter().enumerate() {
                    if start + offset != position {
                        context_rows.extend_from_slice(&word_rows[word]);
                    }
                }
                if context_rows.is_empty() {
                    continue;
                }

                hidden.iter_mut().for_each(|value| *value = 0.0);
                for row in &context_rows {
                    for (acc, value) in hidden.iter_mut().zip(&input[row * dims..(row + 1) * dims]) {
                        *acc += value;
                    }
                }
                let scale = 1.0 / context_rows.len() as f32;
                hidden.iter_mut().for_each(|value| *value *= scale);
                error.iter_mut().for_each(|value| *value = 0.0);

                for sample in 0..=params.negative {
                    let (word, label) = if sample == 0 {
                        (target, 1.0)
                    } else {
                        let word = noise.sample(&mut rng);
                        if word == target {
                            continue;
                        }
                        (word, 0.0)
                    };

                    let out = &mut output[word * dims..(word + 1) * dims];
                    let score = hidden.iter().zip(out.iter()).map(|(a, b)| a * b).sum::<f32>();
                    let gradient = (label - sigmoid(score)) * lr;
                    for ((err, out), hid) in error.iter_mut().zip(out.iter_mut()).zip(&hidden) {
                        *err += gradient * *out;
                        *out += gradient * hid;
                    }
                }

                for row in &context_rows {
                    for (value, err) in input[row * dims..(row + 1) * dims].iter_mut().zip(&error) {
                        *value += err * scale;
                    }
                }
            }
        }
    }

    let vectors = word_rows
        .iter()
        .map(|rows| {
            let mut vector = vec![0f32; dims];
            for row in rows {
                for (acc, value) in vector.iter_mut().zip(&input[row * dims..(row + 1) * dims]) {
                    *acc += value;
                }
            }
            normalized(vector)
        })
        .collect::<Vec<_>>();
    let ngram_rows = (vocabulary.len()..input_rows)
        .map(|row| input[row * dims..(row + 1) * dims].to_vec())
        .collect::<Vec<_>>();
    let words = vocabulary
        .iter()
        .map(|(word, _)| word.to_string())
        .collect::<Vec<_>>();

    debug!(
        words = words.len(),
        ngrams = ngram_buckets.len(),
        steps = step,
        "synonym model trained"
    );

    Ok(SynonymModel::new(
        dims,
        params.min_n,
        params.max_n,
        params.buckets,
        words,
        vectors,
        ngram_buckets,
        ngram_rows,
    ))
}

fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value.clamp(-MAX_EXP, MAX_EXP)).exp())
}
