use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// GRPO 损失: PPO 裁剪代理目标 + 对参考策略的 KL 惩罚。
///
/// 两项分开暴露, 因为 KL 项的 policy 侧由调用方先 detach ——
/// 惩罚只贡献数值, 不贡献梯度, 梯度全部来自代理目标。
#[derive(Clone, Debug)]
pub struct GrpoLoss {
    pub clip_eps: f64,
    pub beta: f64,
}

impl GrpoLoss {
    pub fn new(clip_eps: f64, beta: f64) -> Self {
        Self { clip_eps, beta }
    }

    /// 裁剪代理目标。
    ///
    /// ratio = exp(log_pi_new - log_pi_old),
    /// loss = -mean(min(ratio * A, clip(ratio, 1-eps, 1+eps) * A))
    ///
    /// 所有输入形状为 [Batch]。`log_probs_old` 与 `advantages`
    /// 是采集期冻结的数值, 不在梯度路径上。
    pub fn policy_loss<B: Backend>(
        &self,
        log_probs_new: Tensor<B, 1>,
        log_probs_old: Tensor<B, 1>,
        advantages: Tensor<B, 1>,
    ) -> Tensor<B, 1> {
        let ratio = (log_probs_new - log_probs_old).exp();
        let surr1 = ratio.clone() * advantages.clone();
        let surr2 = ratio.clamp(1.0 - self.clip_eps, 1.0 + self.clip_eps) * advantages;
        -surr1.min_pair(surr2).mean()
    }

    /// beta * mean(KL(policy || reference)), 输入为 [Batch, Vocab] logits
    pub fn kl_penalty<B: Backend>(
        &self,
        policy_logits: Tensor<B, 2>,
        ref_logits: Tensor<B, 2>,
    ) -> Tensor<B, 1> {
        kl_from_logits(policy_logits, ref_logits).mean() * self.beta
    }
}

/// 逐行计算两个 categorical 分布 (以 logits 表示) 的 KL(P || Q)。
/// 输入 [Batch, Vocab], 输出 [Batch]。
pub fn kl_from_logits<B: Backend>(p_logits: Tensor<B, 2>, q_logits: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch_size, _vocab] = p_logits.dims();
    let p = softmax(p_logits.clone(), 1);
    let log_p = log_softmax(p_logits, 1);
    let log_q = log_softmax(q_logits, 1);
    (p * (log_p - log_q)).sum_dim(1).reshape([batch_size])
}
