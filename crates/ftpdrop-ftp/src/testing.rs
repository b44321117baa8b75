//! Scripted in-process FTP server for tests.
//!
//! Speaks just enough RFC 959 for the client in this crate: USER/PASS,
//! TYPE, PWD/CWD, PASV/EPSV, STOR, NLST, NOOP, QUIT. Stored files are kept
//! in memory keyed by their absolute remote path.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct ServerState {
    user: String,
    password: String,
    dirs: HashSet<String>,
    files: HashMap<String, Vec<u8>>,
    stor_attempts: usize,
    logins: usize,
    sessions: usize,
    /// STOR replies `store_failure` this many more times before succeeding.
    failing_stores: usize,
    store_failure: &'static str,
    /// Delay before acknowledging a STOR.
    stor_delay: Duration,
}

/// Handle to a running fake server. Dropping it stops accepting.
pub struct FakeFtpServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    accept_task: JoinHandle<()>,
}

impl FakeFtpServer {
    /// Start a server on `127.0.0.1:0` accepting one user.
    pub async fn start(user: &str, password: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState {
            user: user.to_string(),
            password: password.to_string(),
            dirs: HashSet::from(["/".to_string()]),
            ..ServerState::default()
        }));

        let shared = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let st = shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve(socket, st).await {
                        log::debug!("fake ftp session ended: {}", e);
                    }
                });
            }
        });

        Ok(Self { addr, state, accept_task })
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Make `path` a valid CWD target.
    pub fn add_dir(&self, path: &str) {
        self.lock().dirs.insert(normalize(path));
    }

    /// The next `n` STOR commands fail with a 451.
    pub fn fail_next_stores(&self, n: usize) {
        let mut st = self.lock();
        st.failing_stores = n;
        st.store_failure = "451 Local error in processing";
    }

    /// The next `n` STOR commands are refused with a 550.
    pub fn refuse_next_stores(&self, n: usize) {
        let mut st = self.lock();
        st.failing_stores = n;
        st.store_failure = "550 Permission denied";
    }

    /// Hold every STOR for `delay` before reading the data.
    pub fn delay_stores(&self, delay: Duration) {
        self.lock().stor_delay = delay;
    }

    /// Content stored at an absolute remote path.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(&normalize(path)).cloned()
    }

    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().files.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn stor_attempts(&self) -> usize {
        self.lock().stor_attempts
    }

    pub fn logins(&self) -> usize {
        self.lock().logins
    }

    pub fn sessions(&self) -> usize {
        self.lock().sessions
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for FakeFtpServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn join(dir: &str, name: &str) -> String {
    if name.starts_with('/') {
        normalize(name)
    } else if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

async fn serve(socket: TcpStream, state: Arc<Mutex<ServerState>>) -> std::io::Result<()> {
    state.lock().unwrap_or_else(|p| p.into_inner()).sessions += 1;

    let (rd, mut wr) = socket.into_split();
    let mut reader = BufReader::new(rd);
    wr.write_all(b"220-fake ftp\r\n220 ready\r\n").await?;

    let mut pending_user: Option<String> = None;
    let mut logged_in = false;
    let mut cwd = "/".to_string();
    let mut passive: Option<TcpListener> = None;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let cmd_line = line.trim_end_matches(&['\r', '\n'][..]);
        let (verb, arg) = match cmd_line.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.to_string()),
            None => (cmd_line.to_ascii_uppercase(), String::new()),
        };

        let reply: String = match verb.as_str() {
            "USER" => {
                pending_user = Some(arg);
                "331 Password required".into()
            }
            "PASS" => {
                let mut st = state.lock().unwrap_or_else(|p| p.into_inner());
                if pending_user.as_deref() == Some(st.user.as_str()) && arg == st.password {
                    logged_in = true;
                    st.logins += 1;
                    "230 Logged in".into()
                } else {
                    "530 Login incorrect".into()
                }
            }
            "QUIT" => {
                wr.write_all(b"221 Goodbye\r\n").await?;
                return Ok(());
            }
            "NOOP" => "200 NOOP ok".into(),
            _ if !logged_in => "530 Please login with USER and PASS".into(),
            "TYPE" => format!("200 Type set to {}", arg),
            "PWD" => format!("257 \"{}\" is current directory", cwd),
            "CWD" => {
                let target = join(&cwd, &arg);
                if state.lock().unwrap_or_else(|p| p.into_inner()).dirs.contains(&target) {
                    cwd = target;
                    "250 Directory changed".into()
                } else {
                    "550 No such file or directory".into()
                }
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                passive = Some(listener);
                format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})",
                    port / 256,
                    port % 256
                )
            }
            "EPSV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                passive = Some(listener);
                format!("229 Entering Extended Passive Mode (|||{}|)", port)
            }
            "STOR" => {
                let Some(listener) = passive.take() else {
                    wr.write_all(b"425 Use PASV first\r\n").await?;
                    continue;
                };
                let (failure, delay) = {
                    let mut st = state.lock().unwrap_or_else(|p| p.into_inner());
                    st.stor_attempts += 1;
                    let failure = if st.failing_stores > 0 {
                        st.failing_stores -= 1;
                        Some(st.store_failure)
                    } else {
                        None
                    };
                    (failure, st.stor_delay)
                };
                let (mut data, _) = listener.accept().await?;
                if let Some(reply) = failure {
                    drop(data);
                    reply.to_string()
                } else {
                    wr.write_all(b"150 Ok to send data\r\n").await?;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let mut body = Vec::new();
                    data.read_to_end(&mut body).await?;
                    let path = join(&cwd, &arg);
                    state
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .files
                        .insert(path, body);
                    "226 Transfer complete".into()
                }
            }
            "NLST" => {
                let Some(listener) = passive.take() else {
                    wr.write_all(b"425 Use PASV first\r\n").await?;
                    continue;
                };
                let (mut data, _) = listener.accept().await?;
                wr.write_all(b"150 Here comes the listing\r\n").await?;
                let prefix = if cwd == "/" { "/".to_string() } else { format!("{}/", cwd) };
                let names: Vec<String> = {
                    let st = state.lock().unwrap_or_else(|p| p.into_inner());
                    let mut n: Vec<String> = st
                        .files
                        .keys()
                        .filter_map(|k| k.strip_prefix(&prefix))
                        .filter(|rest| !rest.contains('/'))
                        .map(String::from)
                        .collect();
                    n.sort();
                    n
                };
                for name in names {
                    data.write_all(format!("{}\r\n", name).as_bytes()).await?;
                }
                data.shutdown().await?;
                "226 Directory send OK".into()
            }
            _ => "502 Command not implemented".into(),
        };

        wr.write_all(format!("{}\r\n", reply).as_bytes()).await?;
    }
}
