use clap::{Parser, Subcommand};

use rltune::train::trainer::run_grpo_training;

#[derive(Parser)]
#[command(author, version, about = "RLTune: GRPO 强化学习微调", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 跑 GRPO 强化学习微调, 结束后把 LoRA 适配器写入输出目录
    Train {
        /// JSONL 问题数据集 (每行一个 {"question": ...})
        #[arg(short, long, default_value = "questions.jsonl")]
        data_path: String,

        /// HuggingFace tokenizer.json 路径
        #[arg(short, long, default_value = "tokenizer.json")]
        tokenizer_path: String,

        /// 适配器输出目录
        #[arg(short, long, default_value = "grpo_final")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            data_path,
            tokenizer_path,
            output_dir,
        } => {
            println!("Starting GRPO Training...");
            run_grpo_training(&data_path, &tokenizer_path, &output_dir)?;
        }
    }

    Ok(())
}
