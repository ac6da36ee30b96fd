/// 奖励模型接口: 生成文本 -> 标量, 越大越好。
/// 训练循环对打分逻辑完全不感知, 换成学习式打分器也只是换一个实现。
pub trait RewardModel: Send {
    fn score(&self, text: &str) -> f64;
}

/// 关键词规则奖励: 命中给正分, 未命中给负分。
/// 只是演示训练回路用的占位实现。
pub struct KeywordReward {
    pub keyword: String,
    pub hit: f64,
    pub miss: f64,
}

impl Default for KeywordReward {
    fn default() -> Self {
        Self {
            keyword: "correct".to_string(),
            hit: 1.0,
            miss: -0.5,
        }
    }
}

impl RewardModel for KeywordReward {
    fn score(&self, text: &str) -> f64 {
        if text.to_lowercase().contains(&self.keyword) {
            self.hit
        } else {
            self.miss
        }
    }
}

/// NaN / 无穷的奖励按 0 处理, 不让它污染组统计量
pub fn sanitize_reward(reward: f64) -> f64 {
    if reward.is_finite() {
        reward
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_reward_hit_and_miss() {
        let reward = KeywordReward::default();
        assert_eq!(reward.score("the answer is Correct!"), 1.0);
        assert_eq!(reward.score("no idea"), -0.5);
    }

    #[test]
    fn test_sanitize_reward() {
        assert_eq!(sanitize_reward(0.7), 0.7);
        assert_eq!(sanitize_reward(f64::NAN), 0.0);
        assert_eq!(sanitize_reward(f64::INFINITY), 0.0);
        assert_eq!(sanitize_reward(f64::NEG_INFINITY), 0.0);
    }
}
