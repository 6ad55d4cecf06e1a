use slotdb::{
    config::ServerConfig,
    engine::{Catalog, Database},
    server::serve_listener,
};
use std::{net::SocketAddr, sync::Arc};
use tempfile::TempDir;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

async fn start(dir: &TempDir, buffer_size: usize, max_request: usize) -> SocketAddr {
    let db = Arc::new(Database::open(dir.path(), &Catalog::with_default_tables()).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = ServerConfig::new(dir.path());
    config.buffer_size = buffer_size;
    config.max_request = max_request;
    tokio::spawn(serve_listener(listener, db, config));
    addr
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (r, w) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            reader: BufReader::new(r),
            writer: w,
        }
    }

    async fn send(&mut self, text: &str) {
        self.writer.write_all(text.as_bytes()).await.unwrap();
    }

    async fn request(&mut self, line: &str) -> String {
        self.send(&format!("{}\n", line)).await;
        self.line().await
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "connection closed early");
        line.trim_end_matches('\n').to_string()
    }

    async fn lines(&mut self, n: usize) -> Vec<String> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.line().await);
        }
        out
    }

    /// True once the server has closed its side.
    async fn at_eof(&mut self) -> bool {
        let mut line = String::new();
        matches!(self.reader.read_line(&mut line).await, Ok(0) | Err(_))
    }
}

#[tokio::test]
async fn test_insert_select_delete_and_quit() {
    let dir = TempDir::new().unwrap();
    let addr = start(&dir, 4096, 1024).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.request("INSERT INTO test VALUES (1, 'one')").await, "inserted at id 1");
    assert_eq!(client.request("INSERT INTO test VALUES (2, 'two')").await, "inserted at id 2");

    client.send("SELECT * FROM test\n").await;
    assert_eq!(client.lines(2).await, vec!["1,one", "2,two"]);

    assert_eq!(client.request("DELETE FROM test WHERE first = 1").await, "deleted 1 rows");
    assert_eq!(client.request("INSERT INTO test VALUES (3, 'three')").await, "inserted at id 1");

    client.send("SELECT second FROM test ORDER BY first\n").await;
    assert_eq!(client.lines(2).await, vec!["two", "three"]);

    assert_eq!(
        client.request("SELECT * FROM nope").await,
        "ERROR: not found: no such table: nope"
    );
    assert!(client.request("FROB the table").await.starts_with("ERROR: "));
    assert!(client
        .request("SELECT * FROM test WHERE first = 'x'")
        .await
        .starts_with("ERROR: invalid operation"));

    assert_eq!(client.request("QUIT").await, "bye");
    assert!(client.at_eof().await);
}

#[tokio::test]
async fn test_pipelined_requests_are_answered_in_order() {
    let dir = TempDir::new().unwrap();
    let addr = start(&dir, 4096, 1024).await;
    let mut client = Client::connect(addr).await;

    client
        .send(concat!(
            "INSERT INTO cities VALUES ('Tokyo', 'JPN', 'Kanto', 13960000)\r\n",
            "\n",
            "INSERT INTO cities VALUES ('Hamlet', 'GBR', 'Kent', 300)\n",
            "INSERT INTO cities VALUES ('Accra', 'GHA', 'Greater Accra', 2291000)\n",
            "SELECT name, population FROM cities WHERE population > 1000 ORDER BY name\n",
            "DELETE FROM cities WHERE country_code <> 'JPN'\n",
            "SELECT name FROM cities\n",
            "QUIT\n",
        ))
        .await;

    assert_eq!(
        client.lines(8).await,
        vec![
            "inserted at id 1",
            "inserted at id 2",
            "inserted at id 3",
            "Accra,2291000",
            "Tokyo,13960000",
            "deleted 2 rows",
            "Tokyo",
            "bye",
        ]
    );
    assert!(client.at_eof().await);
}

#[tokio::test]
async fn test_results_larger_than_output_buffer() {
    let dir = TempDir::new().unwrap();
    let addr = start(&dir, 64, 1024).await;
    let mut client = Client::connect(addr).await;

    let mut inserts = String::new();
    for i in 0..300 {
        inserts.push_str(&format!("INSERT INTO test VALUES ({}, 'row {}')\n", i - 150, i));
    }
    client.send(&inserts).await;
    let acks = client.lines(300).await;
    assert_eq!(acks[0], "inserted at id 1");
    assert_eq!(acks[299], "inserted at id 300");

    client.send("SELECT * FROM test\n").await;
    let rows = client.lines(300).await;
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row, &format!("{},row {}", i as i64 - 150, i));
    }

    client.send("SELECT first FROM test WHERE first < 0 ORDER BY second\n").await;
    let negative = client.lines(150).await;
    assert_eq!(negative[0], "-150");
    assert!(negative.iter().all(|v| v.starts_with('-')));

    // widest cities row cannot fit in 64 bytes
    assert!(client
        .request("SELECT * FROM cities")
        .await
        .starts_with("ERROR: rows can be"));
    // an empty result writes nothing, so the next response follows directly
    client.send("SELECT * FROM test WHERE first = 1000\n").await;
    assert_eq!(client.request("QUIT").await, "bye");
}

#[tokio::test]
async fn test_clients_share_tables() {
    let dir = TempDir::new().unwrap();
    let addr = start(&dir, 4096, 1024).await;
    let mut writer = Client::connect(addr).await;
    let mut reader = Client::connect(addr).await;

    assert_eq!(writer.request("INSERT INTO test VALUES (7, 'seven')").await, "inserted at id 1");
    reader.send("SELECT second FROM test WHERE first = 7\n").await;
    assert_eq!(reader.line().await, "seven");

    assert_eq!(reader.request("DELETE FROM test").await, "deleted 1 rows");
    assert_eq!(writer.request("DELETE FROM test").await, "deleted 0 rows");
}

#[tokio::test]
async fn test_oversized_request_closes_connection() {
    let dir = TempDir::new().unwrap();
    let addr = start(&dir, 4096, 64).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.request("DELETE FROM test").await, "deleted 0 rows");
    client.send(&"x".repeat(200)).await;
    assert!(client.at_eof().await);

    // the server keeps accepting
    let mut other = Client::connect(addr).await;
    assert_eq!(other.request("QUIT").await, "bye");
}
