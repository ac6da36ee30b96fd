use burn::optim::AdamWConfig;

use rltune::backend::{get_device, MyAutodiffBackend};
use rltune::data::{CyclicLoader, EncodedPrompt, PromptDataset, TokenDecoder};
use rltune::model::{PolicyConfig, PolicyModel};
use rltune::train::reward::RewardModel;
use rltune::train::trainer::GrpoTrainer;
use rltune::train::GrpoTrainingConfig;

/// 免 tokenizer 的解码器: 把 token id 直接拼成文本
struct DigitDecoder {
    vocab: usize,
}

impl TokenDecoder for DigitDecoder {
    fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn eos_id(&self) -> u32 {
        0
    }

    fn vocab_size(&self) -> usize {
        self.vocab
    }
}

/// 恒定奖励, 用来钉死同步判据
struct ConstReward(f64);

impl RewardModel for ConstReward {
    fn score(&self, _text: &str) -> f64 {
        self.0
    }
}

fn tiny_config(output_dir: &str) -> GrpoTrainingConfig {
    let mut config = GrpoTrainingConfig::new(PolicyConfig::tiny());
    config.epochs = 1;
    config.steps_per_group = 4;
    config.batch_size = 1;
    config.max_new_tokens = 4;
    config.max_seq_len = 8;
    config.output_dir = std::env::temp_dir()
        .join(output_dir)
        .to_string_lossy()
        .into_owned();
    config
}

fn prompt(seed: u32) -> EncodedPrompt {
    // 8 个位置, 前 6 个真实, 后 2 个 EOS 填充
    let ids: Vec<u32> = (0..6).map(|i| 1 + (seed + i) % 60).collect();
    let mut input_ids = ids;
    input_ids.resize(8, 0);
    let mut attention_mask = vec![1u32; 6];
    attention_mask.resize(8, 0);
    EncodedPrompt {
        input_ids,
        attention_mask,
    }
}

fn dataset(n: u32) -> PromptDataset {
    PromptDataset::from_encoded((0..n).map(prompt).collect())
}

fn run(
    config: GrpoTrainingConfig,
    loader: &mut CyclicLoader,
    reward: Box<dyn RewardModel>,
) -> rltune::train::TrainReport {
    let device = get_device();
    let decoder = Box::new(DigitDecoder { vocab: 64 });

    let optimizer = config
        .optimizer
        .init::<MyAutodiffBackend, PolicyModel<MyAutodiffBackend>>();

    let trainer =
        GrpoTrainer::<MyAutodiffBackend>::new(config, decoder, reward, device).unwrap();
    let (_policy, report) = trainer.train(loader, optimizer).unwrap();
    report
}

#[test]
fn test_single_epoch_operation_counts() {
    let mut loader = CyclicLoader::new(dataset(8)).unwrap();
    let report = run(
        tiny_config("rltune_counts"),
        &mut loader,
        Box::new(ConstReward(1.0)),
    );

    assert_eq!(report.epochs.len(), 1);
    let stats = &report.epochs[0];
    assert_eq!(stats.rollouts, 4);
    assert_eq!(stats.advantage_calls, 1);
    assert_eq!(stats.optimizer_steps, 4);
    assert_eq!(stats.buffer_adds, 1);
}

#[test]
fn test_adapter_is_persisted_after_training() {
    let config = tiny_config("rltune_persist");
    let output_dir = config.output_dir.clone();
    let mut loader = CyclicLoader::new(dataset(8)).unwrap();
    run(config, &mut loader, Box::new(ConstReward(1.0)));

    assert!(std::path::Path::new(&output_dir)
        .join("adapter.bin")
        .exists());
}

#[test]
fn test_small_dataset_wraps_instead_of_failing() {
    // 数据集只有 2 条, 一个 epoch 要 4 个 rollout -> 必须回绕
    let mut loader = CyclicLoader::new(dataset(2)).unwrap();
    let report = run(
        tiny_config("rltune_wrap"),
        &mut loader,
        Box::new(ConstReward(1.0)),
    );

    assert_eq!(report.epochs[0].rollouts, 4);
    assert!(loader.restarts() >= 1);
}

#[test]
fn test_reference_syncs_only_on_positive_mean_return() {
    let mut loader = CyclicLoader::new(dataset(8)).unwrap();
    let report = run(
        tiny_config("rltune_sync_pos"),
        &mut loader,
        Box::new(ConstReward(1.0)),
    );
    assert!(report.epochs[0].synced_reference);

    let mut loader = CyclicLoader::new(dataset(8)).unwrap();
    let report = run(
        tiny_config("rltune_sync_neg"),
        &mut loader,
        Box::new(ConstReward(-0.5)),
    );
    assert!(!report.epochs[0].synced_reference);

    // 回报恰为 0 也不同步: 判据是严格大于
    let mut loader = CyclicLoader::new(dataset(8)).unwrap();
    let report = run(
        tiny_config("rltune_sync_zero"),
        &mut loader,
        Box::new(ConstReward(0.0)),
    );
    assert!(!report.epochs[0].synced_reference);
}

#[test]
fn test_multi_epoch_counts_accumulate_per_epoch() {
    let mut config = tiny_config("rltune_multi");
    config.epochs = 2;
    let mut loader = CyclicLoader::new(dataset(8)).unwrap();
    let report = run(config, &mut loader, Box::new(ConstReward(1.0)));

    assert_eq!(report.epochs.len(), 2);
    for stats in &report.epochs {
        assert_eq!(stats.rollouts, 4);
        assert_eq!(stats.advantage_calls, 1);
        assert_eq!(stats.optimizer_steps, 4);
        assert_eq!(stats.buffer_adds, 1);
    }
}
