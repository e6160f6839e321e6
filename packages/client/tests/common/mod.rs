use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Stand-in beanstalkd: accepts one connection, answers each command line
/// with the next scripted reply and returns the commands it received.
pub async fn spawn_fake_server(
    replies: Vec<String>,
) -> std::io::Result<(String, JoinHandle<Vec<String>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?.to_string();

    let handle = tokio::spawn(async move {
        let mut commands = Vec::new();
        let Ok((socket, _)) = listener.accept().await else {
            return commands;
        };
        let mut stream = BufStream::new(socket);
        for reply in replies {
            let mut line = String::new();
            match stream.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            commands.push(line.trim_end().to_string());
            if stream.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
            let _ = stream.flush().await;
        }
        commands
    });

    Ok((address, handle))
}

/// Reply line plus data block, with the byte count filled in.
pub fn with_body(status: &str, body: &str) -> String {
    format!("{} {}\r\n{}\r\n", status, body.len(), body)
}

pub fn reply(line: &str) -> String {
    format!("{}\r\n", line)
}
