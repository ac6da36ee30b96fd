use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::Rng;

use crate::model::PolicyModel;

/// 一次采集的 rollout。全部是 host 侧数据:
/// 各阶段按需在各自的 backend 上重建张量, 用完即弃,
/// 不跨 epoch 持有任何设备端激活。
#[derive(Clone, Debug)]
pub struct Rollout {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    /// 每条序列的真实 (非填充) 长度
    pub lengths: Vec<usize>,
    /// 每条序列在最后真实位置采出的动作 token
    pub actions: Vec<u32>,
    /// 采集期冻结的 log pi_old(a), 更新阶段只作常量使用
    pub log_probs_old: Vec<f32>,
    pub returns: Vec<f64>,
    /// 参考策略在决策位置的 logits [Batch, Vocab], 采集期冻结
    pub ref_logits: TensorData,
}

/// 把 host 侧 ids/mask 变成设备上的 Int 张量对
pub fn to_tensors<B: Backend>(
    ids: &[Vec<u32>],
    mask: &[Vec<u32>],
    device: &B::Device,
) -> (Tensor<B, 2, Int>, Tensor<B, 2, Int>) {
    let batch_size = ids.len();
    let seq_len = ids[0].len();

    let flat_ids: Vec<i32> = ids.iter().flatten().map(|&t| t as i32).collect();
    let flat_mask: Vec<i32> = mask.iter().flatten().map(|&m| m as i32).collect();

    (
        Tensor::from_data(TensorData::new(flat_ids, [batch_size, seq_len]), device),
        Tensor::from_data(TensorData::new(flat_mask, [batch_size, seq_len]), device),
    )
}

/// 取每条序列最后一个真实位置的 logits —— 生成的第一个决策步。
/// `logits`: [Batch, Seq, Vocab], 返回 [Batch, Vocab]。
pub fn last_position_logits<B: Backend>(logits: Tensor<B, 3>, lengths: &[usize]) -> Tensor<B, 2> {
    let [batch_size, _seq_len, vocab_size] = logits.dims();

    let mut rows = Vec::with_capacity(batch_size);
    for (row, &len) in lengths.iter().enumerate() {
        let pos = len.max(1) - 1;
        rows.push(
            logits
                .clone()
                .slice([row..row + 1, pos..pos + 1, 0..vocab_size]),
        );
    }
    Tensor::cat(rows, 0).reshape([batch_size, vocab_size])
}

/// 对 [Batch, Vocab] logits 逐行做 multinomial 采样。
/// 返回 (采出的 token, 对应的 log 概率)。
pub fn sample_actions<B: Backend>(logits: &Tensor<B, 2>) -> (Vec<u32>, Vec<f32>) {
    let [batch_size, vocab_size] = logits.dims();

    let probs: Vec<f32> = softmax(logits.clone(), 1).into_data().iter::<f32>().collect();
    let log_probs: Vec<f32> = log_softmax(logits.clone(), 1)
        .into_data()
        .iter::<f32>()
        .collect();

    let mut rng = rand::thread_rng();
    let mut actions = Vec::with_capacity(batch_size);
    let mut picked = Vec::with_capacity(batch_size);

    for row in 0..batch_size {
        let row_probs = &probs[row * vocab_size..(row + 1) * vocab_size];
        let draw: f32 = rng.gen();

        let mut cumulative = 0.0;
        let mut index = vocab_size - 1; // 浮点误差兜底: 落不进任何桶时取最后一个
        for (i, p) in row_probs.iter().enumerate() {
            cumulative += p;
            if draw < cumulative {
                index = i;
                break;
            }
        }

        actions.push(index as u32);
        picked.push(log_probs[row * vocab_size + index]);
    }

    (actions, picked)
}

/// 取出动作 token 的 log 概率 (保留梯度路径)。
/// `logits`: [Batch, Vocab], 返回 [Batch]。
pub fn gather_log_probs<B: Backend>(
    logits: Tensor<B, 2>,
    actions: &[u32],
    device: &B::Device,
) -> Tensor<B, 1> {
    let batch_size = actions.len();
    let indexes: Vec<i32> = actions.iter().map(|&a| a as i32).collect();
    let indexes: Tensor<B, 2, Int> =
        Tensor::from_data(TensorData::new(indexes, [batch_size, 1]), device);

    log_softmax(logits, 1).gather(1, indexes).reshape([batch_size])
}

/// 自回归生成: 固定预算, 逐 token 采样, 没有提前停止。
/// 每一步都对当前全序列重跑前向 (无 KV cache), 超出 RoPE 表长时
/// 只保留最近的窗口。
pub fn generate_tokens<B: Backend>(
    model: &PolicyModel<B>,
    prompt: &[u32],
    max_new_tokens: usize,
    device: &B::Device,
) -> Vec<u32> {
    let mut ids: Vec<u32> = prompt.to_vec();

    for _ in 0..max_new_tokens {
        let start = ids.len().saturating_sub(model.max_seq_len);
        let window = &ids[start..];
        let seq_len = window.len();

        let tokens: Tensor<B, 2, Int> = Tensor::from_data(
            TensorData::new(window.iter().map(|&t| t as i32).collect(), [1, seq_len]),
            device,
        );
        // 全 1 mask: 生成出的 EOS 是内容, 不当填充处理
        let mask: Tensor<B, 2, Int> = Tensor::from_data(
            TensorData::new(vec![1i32; seq_len], [1, seq_len]),
            device,
        );

        let logits = model.forward(tokens, Some(mask));
        let [_, s, vocab_size] = logits.dims();
        let last = logits.slice([0..1, s - 1..s, 0..vocab_size]).reshape([1, vocab_size]);

        let (actions, _) = sample_actions(&last);
        ids.push(actions[0]);
    }

    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{get_device, MyBackend};
    use crate::model::PolicyConfig;

    type TestBackend = MyBackend;

    #[test]
    fn test_sample_actions_follows_peaked_distribution() {
        let device = get_device();
        // token 2 的概率接近 1
        let logits = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0, 50.0, 0.0]], &device);

        let (actions, log_probs) = sample_actions(&logits);
        assert_eq!(actions, vec![2]);
        assert!(log_probs[0] > -1e-3);
    }

    #[test]
    fn test_last_position_logits_picks_real_positions() {
        let device = get_device();
        // Batch 2, Seq 3, Vocab 2; 用位置编号当值以便断言
        let logits = Tensor::<TestBackend, 3>::from_floats(
            [
                [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]],
                [[10.0, 10.0], [11.0, 11.0], [12.0, 12.0]],
            ],
            &device,
        );

        let last = last_position_logits(logits, &[3, 1]);
        let values: Vec<f32> = last.into_data().iter::<f32>().collect();
        assert_eq!(values, vec![2.0, 2.0, 10.0, 10.0]);
    }

    #[test]
    fn test_gather_log_probs_matches_host_sampling() {
        let device = get_device();
        let logits = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0, 3.0]], &device);

        let gathered = gather_log_probs(logits.clone(), &[2], &device);
        let host: Vec<f32> = log_softmax(logits, 1).into_data().iter::<f32>().collect();

        let value = gathered.into_scalar();
        assert!((value - host[2]).abs() < 1e-6);
    }

    #[test]
    fn test_generate_respects_budget() {
        let device = get_device();
        let config = PolicyConfig::tiny();
        let model = PolicyModel::<TestBackend>::new(&config, 0, &device);

        let prompt = vec![1, 2, 3];
        let out = generate_tokens(&model, &prompt, 5, &device);

        assert_eq!(out.len(), prompt.len() + 5);
        assert_eq!(&out[..3], prompt.as_slice());
        assert!(out.iter().all(|&t| (t as usize) < config.vocab_size));
    }
}
