use crate::{
    cli_display::CliDisplay,
    console::Console,
    lobby_interface::LobbyInterface,
    room_interface::{RoomExit, RoomInterface, RoomOptions},
    server_connection::ServerConnection,
};

pub struct Client {}

impl Client {
    pub async fn run(
        server_addr: &str,
        port: u16,
        username: &str,
        options: RoomOptions,
    ) -> anyhow::Result<()> {
        let server_tcp_addr = format!("{}:{}", server_addr, port);

        let ServerConnection {
            sender,
            mut incoming,
            connection_id,
        } = ServerConnection::connect(&server_tcp_addr).await?;

        log::debug!("Server assigned connection id {}", connection_id);
        CliDisplay::print_connected_message(&server_tcp_addr, username);

        let mut console = Console::spawn();

        loop {
            let session =
                LobbyInterface::run(&mut console, &sender, &mut incoming, username).await?;

            let Some(session) = session else {
                return Ok(());
            };

            let exit = RoomInterface::run(
                session,
                &mut console,
                &sender,
                &mut incoming,
                &options,
            )
            .await?;

            if exit == RoomExit::InputClosed {
                return Ok(());
            }
        }
    }
}
