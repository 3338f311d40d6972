use crate::core::config::data::{Config, FlavorKind};

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        println!("  api.base_url: {}", self.api.base_url);
        match &self.api.relay_url {
            Some(relay) => println!("  api.relay_url: {relay}"),
            None => println!("  api.relay_url: (unset, direct calls)"),
        }
        match self.stream.flavor {
            FlavorKind::Talks => {
                println!("  stream.flavor: talks");
                println!("  stream.source_url: {}", self.stream.source_url);
                println!(
                    "  stream.voice: {} {} ({})",
                    self.stream.voice_provider, self.stream.voice_id, self.stream.voice_style
                );
            }
            FlavorKind::Agent => {
                println!("  stream.flavor: agent");
                match &self.stream.agent_id {
                    Some(agent) => println!("  stream.agent_id: {agent}"),
                    None => println!("  stream.agent_id: (unset)"),
                }
            }
        }
        println!(
            "  session: timeout {}s, reconnect delay {}s, {} automatic reconnects",
            self.session.connect_timeout_secs,
            self.session.reconnect_delay_secs,
            self.session.max_auto_reconnects
        );
        match &self.session.greeting {
            Some(greeting) => println!("  session.greeting: {greeting}"),
            None => println!("  session.greeting: (none)"),
        }
        println!(
            "  transport: {} attempts, backoff base {}ms",
            self.transport.max_attempts, self.transport.backoff_base_ms
        );
        println!(
            "  playback: {}ms + {}ms/char, max {}ms",
            self.playback.base_ms, self.playback.per_char_ms, self.playback.max_ms
        );
        println!("  relay.listen: {}", self.relay.listen);
    }
}
