use anyhow::bail;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};

use crate::data::prompt::CyclicLoader;
use crate::data::TokenDecoder;
use crate::model::{AdapterState, PolicyModel};
use crate::train::buffer::GroupBuffer;
use crate::train::grpo::GrpoLoss;
use crate::train::reward::{sanitize_reward, RewardModel};
use crate::train::rollout::{
    gather_log_probs, generate_tokens, last_position_logits, sample_actions, to_tensors, Rollout,
};
use crate::train::{EpochStats, GrpoTrainingConfig, TrainReport};

/// GRPO 训练器。
///
/// 每个 epoch 固定按四个阶段走:
///
/// 1. COLLECT   无梯度采集 `steps_per_group` 个 rollout
/// 2. ADVANTAGE 把组内标量回报变成相对优势 (恰好调用一次)
/// 3. UPDATE    逐 rollout 做裁剪代理 + KL 惩罚的优化步
/// 4. SYNC      快照入缓冲区; 组平均回报为正才推进参考策略
///
/// policy 在 autodiff backend 上, reference 永远留在 inner backend 上
/// (结构上就不可能对它求梯度)。两者之间只通过 host 侧的
/// `AdapterState` 交换权重。
pub struct GrpoTrainer<B: AutodiffBackend> {
    config: GrpoTrainingConfig,
    policy: PolicyModel<B>,
    reference: PolicyModel<B::InnerBackend>,
    buffer: GroupBuffer,
    /// 最近一次被接受的适配器; 每个 epoch 开头回载进参考模型
    ref_adapter: AdapterState,
    decoder: Box<dyn TokenDecoder>,
    reward: Box<dyn RewardModel>,
    device: B::Device,
}

impl<B: AutodiffBackend> GrpoTrainer<B> {
    pub fn new(
        config: GrpoTrainingConfig,
        decoder: Box<dyn TokenDecoder>,
        reward: Box<dyn RewardModel>,
        device: B::Device,
    ) -> anyhow::Result<Self> {
        if config.model.vocab_size != decoder.vocab_size() {
            bail!(
                "模型词表 ({}) 与解码器词表 ({}) 不一致",
                config.model.vocab_size,
                decoder.vocab_size()
            );
        }

        let policy = PolicyModel::<B>::new(&config.model, decoder.eos_id(), &device);
        // 参考模型从同一份权重出发, 之后只通过适配器快照更新
        let reference = policy.valid();
        let ref_adapter = policy.adapter_state();
        let buffer = GroupBuffer::new(config.buffer_size);

        Ok(Self {
            config,
            policy,
            reference,
            buffer,
            ref_adapter,
            decoder,
            reward,
            device,
        })
    }

    pub fn train<O>(
        self,
        loader: &mut CyclicLoader,
        mut optimizer: O,
    ) -> anyhow::Result<(PolicyModel<B>, TrainReport)>
    where
        O: Optimizer<PolicyModel<B>, B>,
    {
        let GrpoTrainer {
            config,
            mut policy,
            mut reference,
            mut buffer,
            mut ref_adapter,
            decoder,
            reward,
            device,
        } = self;

        let loss_fn = GrpoLoss::new(config.clip_epsilon, config.kl_beta);
        let mut report = TrainReport::default();

        for epoch in 0..config.epochs {
            log::info!("epoch {} 开始", epoch);

            // SYNC 的生效点: 参考模型回载最近被接受的适配器
            reference = reference.load_adapter(&ref_adapter, &device)?;

            let mut stats = EpochStats::default();
            let mut group_returns: Vec<f64> = Vec::with_capacity(config.steps_per_group);
            let mut rollouts: Vec<Rollout> = Vec::with_capacity(config.steps_per_group);

            // ---- COLLECT: inner backend, 无梯度 ----
            {
                let frozen = policy.valid();
                for _ in 0..config.steps_per_group {
                    let batch = loader.next_batch(config.batch_size);
                    let ids: Vec<Vec<u32>> =
                        batch.iter().map(|p| p.input_ids.clone()).collect();
                    let mask: Vec<Vec<u32>> =
                        batch.iter().map(|p| p.attention_mask.clone()).collect();
                    let lengths: Vec<usize> = batch.iter().map(|p| p.real_len()).collect();

                    let (tokens, attn) = to_tensors::<B::InnerBackend>(&ids, &mask, &device);
                    let policy_last = last_position_logits(
                        frozen.try_forward(tokens.clone(), attn.clone())?,
                        &lengths,
                    );
                    let ref_last =
                        last_position_logits(reference.try_forward(tokens, attn)?, &lengths);

                    let (actions, log_probs_old) = sample_actions(&policy_last);

                    // 完整生成一次交给奖励模型; 生成与动作采样同策略
                    let mut returns = Vec::with_capacity(ids.len());
                    for (row, &len) in lengths.iter().enumerate() {
                        let len = len.max(1);
                        let generated = generate_tokens(
                            &frozen,
                            &ids[row][..len],
                            config.max_new_tokens,
                            &device,
                        );
                        let text = decoder.decode(&generated);
                        returns.push(sanitize_reward(reward.score(&text)));
                    }

                    let mean_return =
                        returns.iter().sum::<f64>() / returns.len() as f64;
                    group_returns.push(mean_return);

                    rollouts.push(Rollout {
                        input_ids: ids,
                        attention_mask: mask,
                        lengths,
                        actions,
                        log_probs_old,
                        returns,
                        ref_logits: ref_last.into_data(),
                    });
                    stats.rollouts += 1;
                }
                // frozen 在此释放, COLLECT 的激活不会带进 UPDATE
            }

            // ---- ADVANTAGE: 整组一次 ----
            let advantages = buffer.calculate_relative_advantage(&group_returns);
            stats.advantage_calls += 1;

            // ---- UPDATE: autodiff backend, 逐 rollout 一步 ----
            let mut loss_sum = 0.0;
            for (rollout, &advantage) in rollouts.iter().zip(advantages.iter()) {
                let (tokens, attn) =
                    to_tensors::<B>(&rollout.input_ids, &rollout.attention_mask, &device);
                let logits = policy.try_forward(tokens, attn)?;
                let last = last_position_logits(logits, &rollout.lengths);

                let batch_size = rollout.actions.len();
                let log_probs_new = gather_log_probs(last.clone(), &rollout.actions, &device);
                let log_probs_old =
                    Tensor::<B, 1>::from_floats(rollout.log_probs_old.as_slice(), &device);
                let adv = Tensor::<B, 1>::from_floats(
                    vec![advantage as f32; batch_size].as_slice(),
                    &device,
                );
                let ref_logits = Tensor::<B, 2>::from_data(rollout.ref_logits.clone(), &device);

                let policy_loss = loss_fn.policy_loss(log_probs_new, log_probs_old, adv);
                // KL 项只出数值不出梯度: policy 侧 detach
                let kl_loss = loss_fn.kl_penalty(last.detach(), ref_logits);
                let loss = policy_loss + kl_loss;

                loss_sum += loss.clone().into_scalar().elem::<f32>() as f64;

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &policy);
                policy = optimizer.step(config.learning_rate, policy, grads);
                stats.optimizer_steps += 1;
            }

            // ---- SYNC: 无条件入缓冲区, 有条件推进参考 ----
            let group_avg =
                group_returns.iter().sum::<f64>() / group_returns.len() as f64;
            buffer.add(policy.adapter_state(), group_avg);
            stats.buffer_adds += 1;

            if group_avg > 0.0 {
                ref_adapter = policy.adapter_state();
                stats.synced_reference = true;
                log::info!("组平均回报 {:.4} > 0, 推进参考策略", group_avg);
            }

            stats.mean_return = group_avg;
            stats.mean_loss = if stats.optimizer_steps > 0 {
                loss_sum / stats.optimizer_steps as f64
            } else {
                0.0
            };

            println!(
                "Epoch {}: mean_return={:.4} mean_loss={:.4} buffer={} synced={}",
                epoch,
                stats.mean_return,
                stats.mean_loss,
                buffer.len(),
                stats.synced_reference
            );
            report.epochs.push(stats);
        }

        policy.save_adapter(&config.output_dir)?;
        Ok((policy, report))
    }
}

/// CLI 入口: 读 JSONL 问题集 + tokenizer, 在默认 backend 上跑完整的
/// GRPO 微调并把适配器写入输出目录。
pub fn run_grpo_training(
    data_path: &str,
    tokenizer_path: &str,
    output_dir: &str,
) -> anyhow::Result<()> {
    use crate::backend::{get_device, MyAutodiffBackend};
    use crate::data::{PromptDataset, RlTokenizer};
    use crate::model::PolicyConfig;
    use crate::train::reward::KeywordReward;

    let device = get_device();
    let tokenizer = RlTokenizer::new(tokenizer_path)?;

    let mut model_config = PolicyConfig::small();
    model_config.vocab_size = tokenizer.vocab_size();

    let mut config = GrpoTrainingConfig::new(model_config);
    config.output_dir = output_dir.to_string();

    // 嵌套切分; RL 微调只消费训练子集
    let dataset = PromptDataset::from_file(data_path, &tokenizer, config.max_seq_len)?;
    let (train_data, _val_data, _test_data) = dataset.split(0.2, 0.125, config.seed);
    let mut loader = CyclicLoader::new(train_data)?;

    let optimizer = config
        .optimizer
        .init::<MyAutodiffBackend, PolicyModel<MyAutodiffBackend>>();

    let trainer = GrpoTrainer::<MyAutodiffBackend>::new(
        config,
        Box::new(tokenizer),
        Box::new(KeywordReward::default()),
        device,
    )?;

    let (_policy, report) = trainer.train(&mut loader, optimizer)?;

    for (epoch, stats) in report.epochs.iter().enumerate() {
        println!(
            "[summary] epoch {}: return={:.4} loss={:.4} synced={}",
            epoch, stats.mean_return, stats.mean_loss, stats.synced_reference
        );
    }
    Ok(())
}
