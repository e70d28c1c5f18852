//! Minimal RESP2 server holding sorted sets and lists in memory. It answers
//! the commands the dispatch queue and the connection pool send.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

#[derive(Default)]
struct Store {
    sorted: HashMap<String, HashMap<String, i64>>,
    lists: HashMap<String, VecDeque<String>>,
    scripts: HashSet<String>,
    /// Digest of the last EVALSHA refused with NOSCRIPT; `SCRIPT LOAD`
    /// registers it.
    unknown_script: Option<String>,
    script_loads: usize,
}

enum Reply {
    Simple(&'static str),
    Error(String),
    Int(i64),
    Bulk(Option<String>),
    Array(Option<Vec<Reply>>),
}

impl Reply {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => out.extend_from_slice(format!("+{s}\r\n").as_bytes()),
            Reply::Error(e) => out.extend_from_slice(format!("-{e}\r\n").as_bytes()),
            Reply::Int(n) => out.extend_from_slice(format!(":{n}\r\n").as_bytes()),
            Reply::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Reply::Bulk(Some(s)) => {
                out.extend_from_slice(format!("${}\r\n{s}\r\n", s.len()).as_bytes())
            }
            Reply::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            Reply::Array(Some(items)) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct RedisStub {
    pub url: String,
    store: Arc<Mutex<Store>>,
}

impl RedisStub {
    /// Bind an ephemeral local port and serve until the test runtime ends.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let store = Arc::new(Mutex::new(Store::default()));

        let shared = store.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, shared.clone()));
            }
        });

        Self {
            url: format!("redis://{addr}"),
            store,
        }
    }

    pub fn score(&self, key: &str, member: &str) -> Option<i64> {
        let store = self.store.lock().unwrap();
        store.sorted.get(key).and_then(|set| set.get(member)).copied()
    }

    pub fn sorted_len(&self, key: &str) -> usize {
        let store = self.store.lock().unwrap();
        store.sorted.get(key).map_or(0, HashMap::len)
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        let store = self.store.lock().unwrap();
        store
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn push(&self, key: &str, item: &str) {
        let mut store = self.store.lock().unwrap();
        store
            .lists
            .entry(key.to_owned())
            .or_default()
            .push_back(item.to_owned());
    }

    pub fn script_loads(&self) -> usize {
        self.store.lock().unwrap().script_loads
    }
}

async fn serve_connection(stream: TcpStream, store: Arc<Mutex<Store>>) -> io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut transaction: Option<Vec<Vec<String>>> = None;

    while let Some(args) = read_command(&mut reader).await? {
        let name = args[0].to_ascii_uppercase();
        let reply = match (name.as_str(), transaction.is_some()) {
            ("MULTI", _) => {
                transaction = Some(Vec::new());
                Reply::Simple("OK")
            }
            ("EXEC", true) => {
                let queued = transaction.take().unwrap_or_default();
                let mut store = store.lock().unwrap();
                Reply::Array(Some(
                    queued.iter().map(|cmd| apply(&mut store, cmd)).collect(),
                ))
            }
            (_, true) => {
                if let Some(queued) = transaction.as_mut() {
                    queued.push(args);
                }
                Reply::Simple("QUEUED")
            }
            ("BLPOP", false) => blocking_pop(&store, &args).await,
            (_, false) => {
                let mut store = store.lock().unwrap();
                apply(&mut store, &args)
            }
        };

        let mut out = Vec::new();
        reply.encode(&mut out);
        write.write_all(&out).await?;
    }
    Ok(())
}

async fn read_command<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<String>>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count = header(&line, '*')?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len = header(&line, '$')?;
        let mut buf = vec![0; len + 2];
        reader.read_exact(&mut buf).await?;
        buf.truncate(len);
        args.push(String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?);
    }
    Ok(Some(args))
}

fn header(line: &str, prefix: char) -> io::Result<usize> {
    line.trim_end()
        .strip_prefix(prefix)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("bad header {line:?}")))
}

async fn blocking_pop(store: &Mutex<Store>, args: &[String]) -> Reply {
    let key = &args[1];
    let secs: f64 = args[2].parse().unwrap_or(0.0);
    let deadline = Instant::now() + Duration::from_secs_f64(secs);
    loop {
        let popped = store
            .lock()
            .unwrap()
            .lists
            .get_mut(key)
            .and_then(VecDeque::pop_front);
        if let Some(item) = popped {
            return Reply::Array(Some(vec![
                Reply::Bulk(Some(key.clone())),
                Reply::Bulk(Some(item)),
            ]));
        }
        if Instant::now() >= deadline {
            return Reply::Array(None);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn apply(store: &mut Store, args: &[String]) -> Reply {
    let name = args[0].to_ascii_uppercase();
    match name.as_str() {
        "CLIENT" | "UNWATCH" | "SELECT" => Reply::Simple("OK"),
        "PING" => match args.get(1) {
            Some(echo) => Reply::Bulk(Some(echo.clone())),
            None => Reply::Simple("PONG"),
        },
        "ZADD" => {
            let set = store.sorted.entry(args[1].clone()).or_default();
            let added = args[2..]
                .chunks(2)
                .filter(|pair| set.insert(pair[1].clone(), pair[0].parse().unwrap_or(0)).is_none())
                .count();
            Reply::Int(added as i64)
        }
        "ZREM" => {
            let removed = store.sorted.get_mut(&args[1]).map_or(0, |set| {
                args[2..].iter().filter(|m| set.remove(*m).is_some()).count()
            });
            Reply::Int(removed as i64)
        }
        "RPUSH" => {
            let list = store.lists.entry(args[1].clone()).or_default();
            list.extend(args[2..].iter().cloned());
            Reply::Int(list.len() as i64)
        }
        "DEL" => {
            let removed = args[1..]
                .iter()
                .filter(|key| store.sorted.remove(*key).is_some() | store.lists.remove(*key).is_some())
                .count();
            Reply::Int(removed as i64)
        }
        "SCRIPT" if args[1].eq_ignore_ascii_case("LOAD") => match store.unknown_script.take() {
            Some(sha) => {
                store.scripts.insert(sha.clone());
                store.script_loads += 1;
                Reply::Bulk(Some(sha))
            }
            None => Reply::Error("ERR no script awaiting load".into()),
        },
        "EVALSHA" if !store.scripts.contains(&args[1]) => {
            store.unknown_script = Some(args[1].clone());
            Reply::Error("NOSCRIPT No matching script. Please use EVAL.".into())
        }
        // The only script the queue loads: promote the lowest due member.
        "EVALSHA" => {
            let (set_key, list_key, max) = (&args[3], &args[4], &args[5]);
            let max: i64 = max.parse().unwrap_or(i64::MIN);
            let due = store.sorted.get(set_key).and_then(|set| {
                set.iter()
                    .filter(|(_, score)| **score <= max)
                    .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
                    .map(|(member, _)| member.clone())
            });
            if let Some(member) = &due {
                if let Some(set) = store.sorted.get_mut(set_key) {
                    set.remove(member);
                }
                store
                    .lists
                    .entry(list_key.clone())
                    .or_default()
                    .push_back(member.clone());
            }
            Reply::Bulk(due)
        }
        other => Reply::Error(format!("ERR unknown command '{other}'")),
    }
}
