use crate::model::AdapterState;

/// 一份带评分的策略快照: 适配器权重 + 产生它的组平均回报
#[derive(Clone, Debug)]
pub struct PolicySnapshot {
    pub adapter: AdapterState,
    pub score: f64,
}

/// 组缓冲区。
///
/// 两个职责: (1) 把一组标量回报变成组内相对优势 (z-score);
/// (2) 维护一个容量有上限的策略快照池, 满了以后淘汰评分最低的一份,
/// 池里留下的始终是见过的最好策略。
///
/// 快照是 host 侧数据, 不占设备显存, 也不绑定任何 backend。
pub struct GroupBuffer {
    snapshots: Vec<PolicySnapshot>,
    max_size: usize,
}

impl GroupBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            snapshots: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// 组内相对优势: A_i = (r_i - mean(r)) / std(r)。
    ///
    /// std 为总体标准差; 组内回报几乎无差异 (std < 1e-8) 时
    /// 返回全零 —— 没有相对信号, 而不是被除法放大的噪声。
    /// 空组返回空。
    pub fn calculate_relative_advantage(&self, group_returns: &[f64]) -> Vec<f64> {
        if group_returns.is_empty() {
            return Vec::new();
        }

        let n = group_returns.len() as f64;
        let mean = group_returns.iter().sum::<f64>() / n;
        let var = group_returns
            .iter()
            .map(|r| (r - mean).powi(2))
            .sum::<f64>()
            / n;
        let std = var.sqrt();

        if std < 1e-8 {
            return vec![0.0; group_returns.len()];
        }

        group_returns.iter().map(|r| (r - mean) / std).collect()
    }

    /// 收一份快照。满了就先淘汰评分最低的那份。
    pub fn add(&mut self, adapter: AdapterState, score: f64) {
        if self.snapshots.len() >= self.max_size {
            if let Some(worst) = self
                .snapshots
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.score.total_cmp(&b.score))
                .map(|(i, _)| i)
            {
                self.snapshots.remove(worst);
            }
        }
        self.snapshots.push(PolicySnapshot { adapter, score });
    }

    /// 评分最高的快照
    pub fn best(&self) -> Option<&PolicySnapshot> {
        self.snapshots
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_adapter() -> AdapterState {
        AdapterState { layers: Vec::new() }
    }

    #[test]
    fn test_advantage_len_matches_input() {
        let buffer = GroupBuffer::new(5);
        assert_eq!(
            buffer.calculate_relative_advantage(&[1.0, 2.0, 3.0]).len(),
            3
        );
        assert!(buffer.calculate_relative_advantage(&[]).is_empty());
    }

    #[test]
    fn test_advantage_equal_returns_are_zero() {
        let buffer = GroupBuffer::new(5);
        let adv = buffer.calculate_relative_advantage(&[1.0, 1.0, 1.0, 1.0]);
        assert!(adv.iter().all(|a| *a == 0.0));
    }

    #[test]
    fn test_advantage_symmetric_pairs() {
        let buffer = GroupBuffer::new(5);
        let adv = buffer.calculate_relative_advantage(&[2.0, -1.0, 2.0, -1.0]);

        // 两个高于均值的彼此相等, 两个低于均值的彼此相等, 符号相反
        assert!((adv[0] - adv[2]).abs() < 1e-12);
        assert!((adv[1] - adv[3]).abs() < 1e-12);
        assert!(adv[0] > 0.0 && adv[1] < 0.0);
        assert!((adv[0] + adv[1]).abs() < 1e-12);
    }

    #[test]
    fn test_advantage_preserves_order_and_sums_to_zero() {
        let buffer = GroupBuffer::new(5);
        let adv = buffer.calculate_relative_advantage(&[-0.5, 0.0, 0.5, 1.0]);

        for pair in adv.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert!(adv.iter().sum::<f64>().abs() < 1e-9);
    }

    #[test]
    fn test_buffer_capacity_invariant() {
        let mut buffer = GroupBuffer::new(3);
        for i in 0..10 {
            buffer.add(empty_adapter(), i as f64);
            assert!(buffer.len() <= 3);
        }
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_buffer_holds_min_of_n_and_capacity() {
        let mut buffer = GroupBuffer::new(5);
        buffer.add(empty_adapter(), 1.0);
        buffer.add(empty_adapter(), 2.0);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_buffer_evicts_lowest_score() {
        let mut buffer = GroupBuffer::new(2);
        buffer.add(empty_adapter(), 1.0);
        buffer.add(empty_adapter(), 5.0);
        buffer.add(empty_adapter(), 3.0);

        // 1.0 被淘汰, 留下 5.0 和 3.0
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.best().unwrap().score, 5.0);
        assert!(buffer
            .snapshots
            .iter()
            .all(|s| s.score > 1.0));
    }
}
