//! 验证码会话
//!
//! 会话保存在注入的 `CaptchaStore` 中；后台清理任务由调用方启动，并通过
//! `CancellationToken` 停止。

use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use dashmap::DashMap;
use rand::Rng;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MAX_DURATION_SECS;

// 去掉了容易混淆的 0 o 1 i I l
const ALPHABET: &[u8] = b"23456789abcdefghjkmnpqrstuvwxyzABCDEFGHJKLMNOPQRSTUVWXYZ";
const CODE_LENGTH: usize = 4;
const NOISE_LINES: usize = 2;
const WIDTH: u32 = 120;
const HEIGHT: u32 = 40;
const BACKGROUND: &str = "#f0f0f0";

#[derive(Debug, Clone)]
pub struct CaptchaSession {
    /// 已转为小写的答案
    pub code: String,
    pub expires_at: Instant,
}

impl CaptchaSession {
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// 验证码会话存储
pub trait CaptchaStore: Send + Sync {
    fn put(&self, session_id: String, session: CaptchaSession);
    fn get(&self, session_id: &str) -> Option<CaptchaSession>;
    /// 返回是否确实删除了一条记录
    fn delete(&self, session_id: &str) -> bool;
    /// 删除所有过期会话，返回删除数量
    fn sweep(&self, now: Instant) -> usize;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct MemoryCaptchaStore {
    sessions: DashMap<String, CaptchaSession>,
}

impl MemoryCaptchaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaptchaStore for MemoryCaptchaStore {
    fn put(&self, session_id: String, session: CaptchaSession) {
        self.sessions.insert(session_id, session);
    }

    fn get(&self, session_id: &str) -> Option<CaptchaSession> {
        self.sessions.get(session_id).map(|s| s.value().clone())
    }

    fn delete(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    fn sweep(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired(now));
        before.saturating_sub(self.sessions.len())
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaChallenge {
    pub session_id: String,
    /// data:image/svg+xml;base64,...
    pub captcha_image: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptchaVerdict {
    pub valid: bool,
    pub message: String,
}

impl CaptchaVerdict {
    fn valid() -> Self {
        Self {
            valid: true,
            message: "验证码验证成功".into(),
        }
    }

    fn invalid(message: &str) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct CaptchaService {
    store: Arc<dyn CaptchaStore>,
    ttl: Duration,
}

impl CaptchaService {
    pub fn new(store: Arc<dyn CaptchaStore>, ttl: Duration) -> Self {
        let ttl = ttl.min(Duration::from_secs(MAX_DURATION_SECS));
        Self { store, ttl }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryCaptchaStore::new()), ttl)
    }

    /// 传入已有的 session_id 时复用该 ID（刷新验证码）
    pub fn generate(&self, session_id: Option<String>) -> CaptchaChallenge {
        let code = random_code(CODE_LENGTH);
        let session_id = session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("captcha_{}", uuid::Uuid::new_v4()));

        self.store.put(
            session_id.clone(),
            CaptchaSession {
                code: code.to_lowercase(),
                expires_at: Instant::now() + self.ttl,
            },
        );

        let svg = render_svg(&code);
        CaptchaChallenge {
            session_id,
            captcha_image: format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg)),
            expires_in: self.ttl.as_secs(),
        }
    }

    /// 答案不区分大小写；验证成功后会话即被删除
    pub fn verify(&self, session_id: &str, answer: &str) -> CaptchaVerdict {
        let Some(session) = self.store.get(session_id) else {
            return CaptchaVerdict::invalid("验证码会话不存在或已过期");
        };

        if session.is_expired(Instant::now()) {
            self.store.delete(session_id);
            return CaptchaVerdict::invalid("验证码已过期");
        }

        if session.code != answer.trim().to_lowercase() {
            return CaptchaVerdict::invalid("验证码错误");
        }

        // 并发验证同一会话时只有删除成功的一方通过
        if self.store.delete(session_id) {
            CaptchaVerdict::valid()
        } else {
            CaptchaVerdict::invalid("验证码会话不存在或已过期")
        }
    }

    pub fn sweep_expired(&self) -> usize {
        self.store.sweep(Instant::now())
    }

    pub fn active_sessions(&self) -> usize {
        self.store.len()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 启动定时清理任务，token 取消后退出
    pub fn start_sweeper(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即返回
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Captcha sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = service.sweep_expired();
                        if removed > 0 {
                            tracing::debug!("Swept {} expired captcha sessions", removed);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
impl CaptchaService {
    /// 放入答案已知的会话
    pub(crate) fn issue_known(&self, code: &str) -> String {
        let session_id = format!("captcha_{}", uuid::Uuid::new_v4());
        self.store.put(
            session_id.clone(),
            CaptchaSession {
                code: code.to_lowercase(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        session_id
    }
}

fn random_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

fn random_color(rng: &mut impl Rng) -> String {
    format!(
        "#{:02x}{:02x}{:02x}",
        rng.gen_range(0..=180u8),
        rng.gen_range(0..=180u8),
        rng.gen_range(0..=180u8)
    )
}

fn render_svg(code: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="100%" height="100%" fill="{bg}"/>"#,
        w = WIDTH,
        h = HEIGHT,
        bg = BACKGROUND
    );

    for _ in 0..NOISE_LINES {
        let color = random_color(&mut rng);
        let _ = write!(
            svg,
            r#"<path d="M{} {} C{} {},{} {},{} {}" stroke="{}" fill="none"/>"#,
            rng.gen_range(0..10),
            rng.gen_range(5..HEIGHT - 5),
            rng.gen_range(20..50),
            rng.gen_range(0..HEIGHT),
            rng.gen_range(60..90),
            rng.gen_range(0..HEIGHT),
            rng.gen_range(WIDTH - 10..WIDTH),
            rng.gen_range(5..HEIGHT - 5),
            color
        );
    }

    let step = WIDTH as usize / (code.chars().count() + 1);
    for (i, ch) in code.chars().enumerate() {
        let x = step * (i + 1);
        let y = rng.gen_range(26..32);
        let rotate = rng.gen_range(-25..=25);
        let color = random_color(&mut rng);
        let _ = write!(
            svg,
            r#"<text x="{x}" y="{y}" fill="{color}" font-size="26" font-family="monospace" text-anchor="middle" transform="rotate({rotate} {x} {y})">{ch}</text>"#,
        );
    }

    svg.push_str("</svg>");
    svg
}
