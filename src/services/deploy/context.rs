//! 部署上下文
//!
//! 统一的部署执行上下文：取消令牌与事件通道

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{DeployEvent, DeployProgress, ErrorReport};

/// 部署执行上下文
///
/// Shared by every run of a chain. Events are best-effort: a dropped receiver
/// never fails the run.
#[derive(Clone, Debug)]
pub struct DeployContext {
    /// 运行 ID
    pub run_id: Uuid,
    /// 取消令牌
    pub cancel_token: CancellationToken,
    /// 事件发送通道
    pub events: Option<mpsc::UnboundedSender<DeployEvent>>,
}

impl DeployContext {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cancel_token,
            events: None,
        }
    }

    /// Context plus the receiving end of its event channel
    pub fn with_channel(cancel_token: CancellationToken) -> (Self, mpsc::UnboundedReceiver<DeployEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut ctx = Self::new(cancel_token);
        ctx.events = Some(tx);
        (ctx, rx)
    }

    fn send(&self, event: DeployEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event);
        }
    }

    /// 发送进度
    pub fn progress(&self, step: &str, details: impl Into<String>) {
        let progress = DeployProgress::new(step, details);
        tracing::info!(run_id = %self.run_id, step = %progress.step, details = %progress.details);
        self.send(DeployEvent::Progress(progress));
    }

    /// 发送带百分比的进度
    pub fn progress_percent(&self, step: &str, details: impl Into<String>, percent: f64) {
        let progress = DeployProgress::new(step, details).with_percent(percent);
        tracing::info!(
            run_id = %self.run_id,
            step = %progress.step,
            details = %progress.details,
            percent,
        );
        self.send(DeployEvent::Progress(progress));
    }

    /// 报告可恢复错误
    pub fn error(&self, report: ErrorReport) {
        tracing::warn!(run_id = %self.run_id, details = %report.details, cause = %report.cause, "Deployment error");
        self.send(DeployEvent::Error(report));
    }

    /// 检查是否被取消
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_receiver() {
        let (ctx, mut rx) = DeployContext::with_channel(CancellationToken::new());
        ctx.progress_percent("Deploying", "a.txt", 50.0);
        ctx.error(ErrorReport::new("Copy a.txt", "denied"));

        match rx.recv().await.unwrap() {
            DeployEvent::Progress(p) => assert_eq!(p.percent_complete, Some(50.0)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), DeployEvent::Error(_)));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (ctx, rx) = DeployContext::with_channel(CancellationToken::new());
        drop(rx);
        ctx.progress("Step", "still fine");
        assert!(!ctx.is_cancelled());
    }
}
