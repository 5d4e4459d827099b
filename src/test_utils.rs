use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::Duration,
};

/// Answer the next connections on a loopback port with the given
/// (status, body), in order.  Returns the base url.
pub fn serve(responses: Vec<(u16, String)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for (status, body) in responses {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            read_request(&mut stream);
            respond(&mut stream, status, &body);
        }
    });
    format!("http://{}", addr)
}

/// A canned answer for requests whose first line contains `needle`, sent
/// after `delay`.
pub struct Route {
    pub needle: String,
    pub delay: Duration,
    pub status: u16,
    pub body: String,
}

/// Answer every connection on its own thread, picking the first route that
/// matches the request line, or a 404.  Returns the base url.
pub fn serve_routes(routes: Vec<Route>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else {
                return;
            };
            let routes = routes.clone();
            thread::spawn(move || {
                let request = read_request(&mut stream);
                let request_line = request.lines().next().unwrap_or("");
                match routes.iter().find(|r| request_line.contains(&r.needle)) {
                    Some(route) => {
                        thread::sleep(route.delay);
                        respond(&mut stream, route.status, &route.body);
                    }
                    None => respond(&mut stream, 404, "no route"),
                }
            });
        }
    });
    format!("http://{}", addr)
}

/// Read the request head, and drain the body if there is one.
fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; 4096];
    let mut request = Vec::new();
    loop {
        let n = stream.read(&mut buf).unwrap_or(0);
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= end + 4 + length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&request).to_string()
}

fn respond(stream: &mut TcpStream, status: u16, body: &str) {
    let response = format!(
        "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// Base url of a port nobody listens on.
pub fn refused() -> String {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    format!("http://127.0.0.1:{}", port)
}
