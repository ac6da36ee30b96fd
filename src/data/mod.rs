use std::path::Path;
use tokenizers::Tokenizer;

pub mod prompt;

pub use prompt::{CyclicLoader, EncodedPrompt, PromptDataset, PromptRecord};

/// 解码侧的最小接口。
///
/// 训练循环只需要 "ids -> 文本" 和 EOS/词表大小两个常量,
/// 测试可以用纯内存实现替换真实 tokenizer。
pub trait TokenDecoder: Send {
    fn decode(&self, ids: &[u32]) -> String;
    fn eos_id(&self) -> u32;
    fn vocab_size(&self) -> usize;
}

/// HuggingFace tokenizers 的包装。
///
/// 没有独立的 pad token, 填充一律复用 EOS。
#[derive(Clone)]
pub struct RlTokenizer {
    tokenizer: Tokenizer,
    eos_id: u32,
}

impl RlTokenizer {
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let tokenizer = Tokenizer::from_file(path).map_err(anyhow::Error::msg)?;
        let eos_id = ["</s>", "<|endoftext|>", "<eos>"]
            .iter()
            .find_map(|tok| tokenizer.token_to_id(tok))
            .ok_or_else(|| anyhow::anyhow!("tokenizer 缺少 EOS token"))?;
        Ok(Self { tokenizer, eos_id })
    }

    /// 定长编码: 截断到 max_length, 不足部分用 EOS 填充,
    /// attention mask 中 1 标记真实 token, 0 标记填充。
    pub fn encode_padded(&self, text: &str, max_length: usize) -> anyhow::Result<EncodedPrompt> {
        let encoding = self.tokenizer.encode(text, true).map_err(anyhow::Error::msg)?;
        let mut input_ids: Vec<u32> = encoding.get_ids().to_vec();
        input_ids.truncate(max_length);

        let mut attention_mask = vec![1u32; input_ids.len()];
        input_ids.resize(max_length, self.eos_id);
        attention_mask.resize(max_length, 0);

        Ok(EncodedPrompt {
            input_ids,
            attention_mask,
        })
    }
}

impl TokenDecoder for RlTokenizer {
    fn decode(&self, ids: &[u32]) -> String {
        self.tokenizer.decode(ids, true).expect("Decoding failed")
    }

    fn eos_id(&self) -> u32 {
        self.eos_id
    }

    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}
