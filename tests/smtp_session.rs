//! End-to-end SMTP sessions against an in-process mock server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use mailer::smtp::LoginAuth;
use mailer::{Dialer, Error, Message, Stage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// How the mock server behaves on every connection.
#[derive(Clone)]
struct Behaviour {
    /// Parameters of the advertised AUTH extension.
    auth: &'static str,
    /// Hang up instead of answering the first MAIL FROM of the first
    /// connection.
    drop_first_mail: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Behaviour {
            auth: "PLAIN LOGIN",
            drop_first_mail: false,
        }
    }
}

struct MockServer {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl MockServer {
    async fn start(behaviour: Behaviour) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = MockServer {
            addr: listener.local_addr().unwrap(),
            commands: Arc::default(),
            messages: Arc::default(),
            connections: Arc::default(),
        };

        let commands = server.commands.clone();
        let messages = server.messages.clone();
        let connections = server.connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let n = connections.fetch_add(1, Ordering::SeqCst);
                let drop_mail = behaviour.drop_first_mail && n == 0;
                tokio::spawn(handle(
                    stream,
                    behaviour.auth,
                    drop_mail,
                    commands.clone(),
                    messages.clone(),
                ));
            }
        });

        server
    }

    fn dialer(&self) -> Dialer {
        Dialer::new("127.0.0.1", self.addr.port(), "user", "pwd")
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn handle(
    stream: TcpStream,
    auth: &'static str,
    drop_mail: bool,
    commands: Arc<Mutex<Vec<String>>>,
    messages: Arc<Mutex<Vec<String>>>,
) {
    let mut stream = BufReader::new(stream);
    let _ = stream.get_mut().write_all(b"220 mock ESMTP ready\r\n").await;

    let mut line = String::new();
    loop {
        line.clear();
        match stream.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = line.trim_end().to_string();
        commands.lock().unwrap().push(command.clone());

        let verb = command
            .split(|c| c == ' ' || c == ':')
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        let reply: String = match verb.as_str() {
            "EHLO" => format!("250-mock\r\n250-AUTH {}\r\n250 8BITMIME\r\n", auth),
            "HELO" => "250 mock\r\n".to_string(),
            "AUTH" if command.starts_with("AUTH LOGIN") => {
                for prompt in ["334 VXNlcm5hbWU6\r\n", "334 UGFzc3dvcmQ6\r\n"] {
                    let _ = stream.get_mut().write_all(prompt.as_bytes()).await;
                    line.clear();
                    if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    commands.lock().unwrap().push(line.trim_end().to_string());
                }
                "235 2.7.0 Authentication successful\r\n".to_string()
            }
            "AUTH" => "235 2.7.0 Authentication successful\r\n".to_string(),
            "MAIL" if drop_mail => return,
            "MAIL" => "250 2.1.0 Ok\r\n".to_string(),
            "RCPT" if command.contains("unknown@") => "550 5.1.1 User unknown\r\n".to_string(),
            "RCPT" => "250 2.1.5 Ok\r\n".to_string(),
            "DATA" => {
                let _ = stream.get_mut().write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n").await;
                let mut data = String::new();
                loop {
                    line.clear();
                    if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    data.push_str(&line);
                }
                messages.lock().unwrap().push(data);
                "250 2.0.0 Ok: queued\r\n".to_string()
            }
            "QUIT" => {
                let _ = stream.get_mut().write_all(b"221 2.0.0 Bye\r\n").await;
                return;
            }
            _ => "502 5.5.2 Command not recognized\r\n".to_string(),
        };
        if stream.get_mut().write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

fn message(to: &str) -> Message {
    let mut m = Message::new();
    m.set_header("From", ["from@example.com"]);
    m.set_header("To", [to]);
    m.set_header("Subject", ["¡Hola, señor!"]);
    m.set_body("text/plain", ".hidden line\nHello");
    m
}

#[tokio::test]
async fn test_plain_session() {
    let server = MockServer::start(Behaviour::default()).await;
    server
        .dialer()
        .dial_and_send(&[message("to@example.com")])
        .await
        .unwrap();

    assert_eq!(
        server.commands(),
        [
            "EHLO localhost",
            "AUTH PLAIN AHVzZXIAcHdk",
            "MAIL FROM:<from@example.com> BODY=8BITMIME",
            "RCPT TO:<to@example.com>",
            "DATA",
            "QUIT",
        ]
    );

    let messages = server.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Subject: =?UTF-8?q?=C2=A1Hola,_se=C3=B1or!?=\r\n"));
    assert!(messages[0].contains("\r\n\r\n..hidden line\r\nHello\r\n"));

    let parsed = mailparse::parse_mail(messages[0].as_bytes()).unwrap();
    let subject = parsed
        .headers
        .iter()
        .find(|h| h.get_key() == "Subject")
        .map(|h| h.get_value())
        .unwrap();
    assert_eq!(subject, "¡Hola, señor!");
}

#[tokio::test]
async fn test_login_session_with_local_name() {
    let server = MockServer::start(Behaviour {
        auth: "LOGIN",
        ..Default::default()
    })
    .await;
    server
        .dialer()
        .local_name("client.example.com")
        .dial_and_send(&[message("to@example.com")])
        .await
        .unwrap();

    let commands = server.commands();
    assert_eq!(
        commands[..4],
        ["EHLO client.example.com", "AUTH LOGIN", "dXNlcg==", "cHdk"]
    );
}

#[tokio::test]
async fn test_explicit_authenticator() {
    let server = MockServer::start(Behaviour::default()).await;
    server
        .dialer()
        .auth(LoginAuth::new("user", "pwd", "127.0.0.1"))
        .dial_and_send(&[message("to@example.com")])
        .await
        .unwrap();

    assert_eq!(server.commands()[1], "AUTH LOGIN");
}

#[tokio::test]
async fn test_reconnects_after_dropped_connection() {
    let server = MockServer::start(Behaviour {
        drop_first_mail: true,
        ..Default::default()
    })
    .await;
    server
        .dialer()
        .dial_and_send(&[message("to@example.com")])
        .await
        .unwrap();

    assert_eq!(server.connections(), 2);
    assert_eq!(server.messages().len(), 1);
    let mails = server
        .commands()
        .iter()
        .filter(|c| c.starts_with("MAIL FROM"))
        .count();
    assert_eq!(mails, 2);
}

#[tokio::test]
async fn test_rejected_recipient() {
    let server = MockServer::start(Behaviour::default()).await;
    let err = server
        .dialer()
        .dial_and_send(&[message("unknown@example.com")])
        .await
        .unwrap_err();

    match err {
        Error::Batch { index, source } => {
            assert_eq!(index, 1);
            match *source {
                Error::Rejected {
                    stage,
                    code,
                    message,
                } => {
                    assert_eq!(stage, Stage::Rcpt("unknown@example.com".to_string()));
                    assert_eq!(code, 550);
                    assert_eq!(message, "5.1.1 User unknown");
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(server.messages().is_empty());
    assert_eq!(server.commands().last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = Dialer::new("127.0.0.1", port, "", "")
        .dial()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connect { .. }));
    assert!(err.is_transient());
}
