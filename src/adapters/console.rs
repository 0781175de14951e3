use crate::error::{BridgeError, BridgeResult};
use crate::event::{InboundMessage, OutboundRecord};
use crate::processor::{DeliveryMode, Dispatcher, Processor};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

const CONSOLE_USER: &str = "console-user";
const CONSOLE_GROUP: &str = "console-group";

/// 把上报打印到标准输出
pub struct ConsoleDispatcher;

#[async_trait]
impl Dispatcher for ConsoleDispatcher {
    async fn dispatch(&self, record: OutboundRecord, mode: DeliveryMode) -> BridgeResult<()> {
        let json = serde_json::to_string(&record).map_err(|e| BridgeError::Dispatch(e.to_string()))?;
        match mode {
            DeliveryMode::Awaited => println!("\x1b[36m[Broadcast] > \x1b[0m{}", json),
            DeliveryMode::FireAndForget => println!("\x1b[90m[Broadcast/async] > \x1b[0m{}", json),
        }
        Ok(())
    }
}

/// 控制台适配器入口：每行一条事件，各自在独立任务中处理
pub async fn run(processor: Arc<Processor>) {
    info!(target: "Console", "已启动控制台模式。每行输入一条 JSON 群消息，或直接输入文本");
    info!(target: "Console", "模拟环境: User: {} | Group: {}", CONSOLE_USER, CONSOLE_GROUP);

    run_lines(processor, BufReader::new(tokio::io::stdin())).await;
}

/// 读到 EOF 后等待所有在途事件处理完再返回
async fn run_lines<R>(processor: Arc<Processor>, input: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = input.lines();
    let mut tasks = JoinSet::new();
    let mut seq = 0u64;

    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(target: "Console", "读取标准输入失败: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        seq += 1;
        let msg = parse_line(line, seq);
        let processor = processor.clone();
        tasks.spawn(async move { processor.handle(msg).await });

        // 回收已完成的任务
        while let Some(res) = tasks.try_join_next() {
            log_join(res);
        }
    }

    info!(target: "Console", "标准输入已关闭，等待 {} 个事件处理完成", tasks.len());
    while let Some(res) = tasks.join_next().await {
        log_join(res);
    }
}

fn log_join(res: Result<(), JoinError>) {
    if let Err(e) = res {
        error!(target: "Console", "事件任务异常退出: {}", e);
    }
}

/// `{` 开头按 JSON 解析，否则视为控制台用户在控制台群里发言
fn parse_line(line: &str, seq: u64) -> InboundMessage {
    if line.starts_with('{') {
        match serde_json::from_str::<InboundMessage>(line) {
            Ok(mut msg) => {
                if msg.seq == 0 {
                    msg.seq = seq;
                }
                return msg;
            }
            Err(e) => warn!(target: "Console", "JSON 解析失败，按文本处理: {}", e),
        }
    }

    InboundMessage {
        id: format!("console-{}", seq),
        author_id: CONSOLE_USER.to_string(),
        group_id: CONSOLE_GROUP.to_string(),
        content: line.to_string(),
        attachments: Vec::new(),
        seq,
    }
}
