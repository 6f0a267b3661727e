use color_eyre::eyre::{
    Result,
    eyre,
};
use crossterm::event::{
    self,
    Event,
    KeyCode,
    KeyEvent,
    KeyEventKind,
    KeyModifiers,
};
use crossterm::terminal::{
    disable_raw_mode,
    enable_raw_mode,
};
use hashlock_escrow::view::{
    FIELD_AMT,
    FIELD_INFO,
    FIELD_PASS,
    RoleView,
    ViewSnapshot,
};
use ratatui::prelude::*;
use ratatui::widgets::*;
use std::io::stdout;
use tokio::sync::mpsc;

pub type InputEventReceiver = mpsc::UnboundedReceiver<Event>;

pub enum UserEvent {
    Quit,
    /// Carries the keystore password when one was asked for.
    Connect(Option<String>),
    DeclinePassword,
    Fund,
    Refresh,
    FieldChanged { name: &'static str, value: String },
    RunAlice,
    RunBob,
    Redraw,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Focus {
    #[default]
    SendAmount,
    SendSecret,
    ReceiveInstance,
    ReceiveSecret,
}

impl Focus {
    fn next(self) -> Self {
        match self {
            Focus::SendAmount => Focus::SendSecret,
            Focus::SendSecret => Focus::ReceiveInstance,
            Focus::ReceiveInstance => Focus::ReceiveSecret,
            Focus::ReceiveSecret => Focus::SendAmount,
        }
    }

    fn prev(self) -> Self {
        match self {
            Focus::SendAmount => Focus::ReceiveSecret,
            Focus::SendSecret => Focus::SendAmount,
            Focus::ReceiveInstance => Focus::SendSecret,
            Focus::ReceiveSecret => Focus::ReceiveInstance,
        }
    }

    fn field(self) -> &'static str {
        match self {
            Focus::SendAmount => FIELD_AMT,
            Focus::SendSecret | Focus::ReceiveSecret => FIELD_PASS,
            Focus::ReceiveInstance => FIELD_INFO,
        }
    }

    fn is_send_form(self) -> bool {
        matches!(self, Focus::SendAmount | Focus::SendSecret)
    }
}

#[derive(Clone, Debug, Default)]
enum Mode {
    #[default]
    Normal,
    PasswordModal(String),
}

pub struct UiState {
    mode: Mode,
    focus: Focus,
    needs_password: bool,
    has_faucet: bool,
    fields: FieldCache,
    terminal: Option<Terminal<CrosstermBackend<std::io::Stdout>>>,
}

#[derive(Clone, Debug, Default)]
struct FieldCache {
    amt: String,
    pass: String,
    info: String,
}

impl FieldCache {
    fn get(&self, name: &str) -> &str {
        match name {
            FIELD_AMT => &self.amt,
            FIELD_PASS => &self.pass,
            FIELD_INFO => &self.info,
            _ => "",
        }
    }

    fn set(&mut self, name: &str, value: String) {
        match name {
            FIELD_AMT => self.amt = value,
            FIELD_PASS => self.pass = value,
            FIELD_INFO => self.info = value,
            _ => {}
        }
    }
}

impl UiState {
    pub fn new(needs_password: bool) -> Self {
        Self {
            mode: Mode::Normal,
            focus: Focus::default(),
            needs_password,
            has_faucet: false,
            fields: FieldCache::default(),
            terminal: None,
        }
    }
}

pub fn terminal_enter(state: &mut UiState) -> Result<()> {
    enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    // Create a single persistent Terminal to preserve buffers across draws
    let backend = CrosstermBackend::new(stdout());
    let terminal = Terminal::new(backend)?;
    state.terminal = Some(terminal);
    Ok(())
}

pub fn terminal_exit() -> Result<()> {
    disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    Ok(())
}

/// Reads terminal events on a dedicated thread so the async loop never
/// blocks on `event::read`.
pub fn input_event_stream() -> InputEventReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while let Ok(ev) = event::read() {
            if tx.send(ev).is_err() {
                break;
            }
        }
    });
    rx
}

pub async fn next_raw_event(input_events: &mut InputEventReceiver) -> Result<Event> {
    input_events
        .recv()
        .await
        .ok_or_else(|| eyre!("terminal input stream closed"))
}

pub fn draw(state: &mut UiState, snap: &ViewSnapshot) -> Result<()> {
    state.has_faucet = snap.has_faucet;
    state.fields = FieldCache {
        amt: snap.amt.clone(),
        pass: snap.pass.clone(),
        info: snap.info.clone(),
    };
    if let Some(mut term) = state.terminal.take() {
        term.draw(|f| ui(f, state, snap))?;
        state.terminal = Some(term);
    }
    Ok(())
}

pub fn interpret_event(state: &mut UiState, event: Event) -> Option<UserEvent> {
    let Event::Key(key) = event else {
        return Some(UserEvent::Redraw);
    };
    if key.kind != KeyEventKind::Press {
        return None;
    }
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(UserEvent::Quit);
    }
    if matches!(state.mode, Mode::Normal) {
        return interpret_normal(state, key);
    }
    match &mut state.mode {
        Mode::PasswordModal(buffer) => match key.code {
            KeyCode::Esc => {
                state.mode = Mode::Normal;
                Some(UserEvent::DeclinePassword)
            }
            KeyCode::Enter => {
                let password = std::mem::take(buffer);
                state.mode = Mode::Normal;
                Some(UserEvent::Connect(Some(password)))
            }
            KeyCode::Backspace => {
                buffer.pop();
                Some(UserEvent::Redraw)
            }
            KeyCode::Char(c) => {
                buffer.push(c);
                Some(UserEvent::Redraw)
            }
            _ => None,
        },
        Mode::Normal => None,
    }
}

fn interpret_normal(state: &mut UiState, key: KeyEvent) -> Option<UserEvent> {
    match key.code {
        KeyCode::Esc => Some(UserEvent::Quit),
        KeyCode::F(2) if state.needs_password => {
            state.mode = Mode::PasswordModal(String::new());
            Some(UserEvent::Redraw)
        }
        KeyCode::F(2) => Some(UserEvent::Connect(None)),
        KeyCode::F(3) if state.has_faucet => Some(UserEvent::Fund),
        KeyCode::F(5) => Some(UserEvent::Refresh),
        KeyCode::Tab | KeyCode::Down => {
            state.focus = state.focus.next();
            Some(UserEvent::Redraw)
        }
        KeyCode::BackTab | KeyCode::Up => {
            state.focus = state.focus.prev();
            Some(UserEvent::Redraw)
        }
        KeyCode::Enter if state.focus.is_send_form() => Some(UserEvent::RunAlice),
        KeyCode::Enter => Some(UserEvent::RunBob),
        KeyCode::Backspace => {
            let name = state.focus.field();
            let mut value = state.fields.get(name).to_string();
            value.pop();
            state.fields.set(name, value.clone());
            Some(UserEvent::FieldChanged { name, value })
        }
        KeyCode::Char(c) if !c.is_control() => {
            let name = state.focus.field();
            let mut value = state.fields.get(name).to_string();
            value.push(c);
            state.fields.set(name, value.clone());
            Some(UserEvent::FieldChanged { name, value })
        }
        _ => None,
    }
}

fn ui(f: &mut Frame, state: &UiState, snap: &ViewSnapshot) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5),
            Constraint::Min(8),
            Constraint::Length(4),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_account(f, chunks[0], snap);
    let forms = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[1]);
    draw_send_form(f, forms[0], state, snap);
    draw_receive_form(f, forms[1], state, snap);
    draw_status(f, chunks[2], snap);
    draw_help(f, chunks[3], state);
    draw_modals(f, state);
}

fn draw_account(f: &mut Frame, area: Rect, snap: &ViewSnapshot) {
    let lines = match (&snap.address, &snap.balance) {
        (Some(address), Some(balance)) => vec![
            Line::from(format!("Network: {}", snap.network_label)),
            Line::from(format!("Address: {address}")),
            Line::from(format!("Balance: {balance}")),
        ],
        _ => vec![
            Line::from(format!("Network: {}", snap.network_label)),
            Line::styled("Not connected; press F2", Style::default().fg(Color::Yellow)),
        ],
    };
    let p = Paragraph::new(lines).block(Block::default().title("Account").borders(Borders::ALL));
    f.render_widget(p, area);
}

fn field_line(label: &str, value: &str, focused: bool, secret: bool) -> Line<'static> {
    let shown = if secret {
        "*".repeat(value.chars().count())
    } else {
        value.to_string()
    };
    let style = if focused {
        Style::default().fg(Color::Black).bg(Color::Cyan)
    } else {
        Style::default()
    };
    Line::from(vec![
        Span::raw(format!("{label:>8}: ")),
        Span::styled(format!("{shown:<24}"), style),
    ])
}

fn role_lines(role: &RoleView, idle: &str) -> Vec<Line<'static>> {
    let action = if role.enabled {
        Line::styled(format!("[Enter] {idle}"), Style::default().fg(Color::Green))
    } else {
        Line::styled("busy or not connected", Style::default().fg(Color::DarkGray))
    };
    let mut lines = vec![Line::from(""), action];
    if let Some(phase) = &role.phase {
        lines.push(Line::from(format!("State: {phase}")));
    }
    lines
}

fn draw_send_form(f: &mut Frame, area: Rect, state: &UiState, snap: &ViewSnapshot) {
    let mut lines = vec![
        field_line("Amount", &snap.amt, state.focus == Focus::SendAmount, false),
        field_line("Secret", &snap.pass, state.focus == Focus::SendSecret, true),
    ];
    lines.extend(role_lines(&snap.alice, "Send funds"));
    if let Some(id) = &snap.deployed {
        lines.push(Line::styled(
            format!("Escrow id: {id}"),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ));
    }
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().title("Send funds").borders(Borders::ALL));
    f.render_widget(p, area);
}

fn draw_receive_form(f: &mut Frame, area: Rect, state: &UiState, snap: &ViewSnapshot) {
    let mut lines = vec![
        field_line("Escrow", &snap.info, state.focus == Focus::ReceiveInstance, false),
        field_line("Secret", &snap.pass, state.focus == Focus::ReceiveSecret, true),
    ];
    lines.extend(role_lines(&snap.bob, "Receive funds"));
    if let Some(id) = &snap.attached {
        lines.push(Line::from(format!("Attached to: {id}")));
    }
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().title("Receive funds").borders(Borders::ALL));
    f.render_widget(p, area);
}

fn draw_status(f: &mut Frame, area: Rect, snap: &ViewSnapshot) {
    let mut lines = Vec::new();
    if let Some(status) = &snap.status {
        lines.push(Line::styled(status.clone(), Style::default().fg(Color::Green)));
    }
    if let Some(error) = &snap.error {
        lines.push(Line::styled(error.clone(), Style::default().fg(Color::Red)));
    } else if let Some(last) = &snap.last_result {
        lines.push(Line::from(format!("Last: {last}")));
    }
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().title("Status").borders(Borders::ALL));
    f.render_widget(p, area);
}

fn draw_help(f: &mut Frame, area: Rect, state: &UiState) {
    let mut help = String::from("F2 connect");
    if state.has_faucet {
        help.push_str("  F3 faucet");
    }
    help.push_str("  F5 refresh  Tab focus  Enter submit  Esc quit");
    f.render_widget(
        Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
        area,
    );
}

fn draw_modals(f: &mut Frame, state: &UiState) {
    if let Mode::PasswordModal(buffer) = &state.mode {
        let area = centered_rect(50, 20, f.area());
        f.render_widget(Clear, area);
        let block = Block::default()
            .title("Keystore password (Enter unlock, Esc cancel)")
            .borders(Borders::ALL);
        let p = Paragraph::new("*".repeat(buffer.chars().count()));
        f.render_widget(block.clone(), area);
        f.render_widget(p, block.inner(area));
    }
}

fn centered_rect(w_percent: u16, h_percent: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - h_percent) / 2),
            Constraint::Percentage(h_percent),
            Constraint::Percentage((100 - h_percent) / 2),
        ])
        .split(r);

    let vertical = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - w_percent) / 2),
            Constraint::Percentage(w_percent),
            Constraint::Percentage((100 - w_percent) / 2),
        ])
        .split(popup_layout[1]);

    vertical[1]
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn press(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn interpret_event__typing_extends_the_focused_field() {
        // given
        let mut state = UiState::new(false);
        state.fields.amt = "1".into();

        // when
        let ev = interpret_event(&mut state, press(KeyCode::Char('5')));

        // then
        match ev {
            Some(UserEvent::FieldChanged { name, value }) => {
                assert_eq!(name, FIELD_AMT);
                assert_eq!(value, "15");
            }
            _ => panic!("expected a field change"),
        }
    }

    #[test]
    fn interpret_event__enter_submits_the_focused_form() {
        let mut state = UiState::new(false);
        assert!(matches!(
            interpret_event(&mut state, press(KeyCode::Enter)),
            Some(UserEvent::RunAlice)
        ));
        interpret_event(&mut state, press(KeyCode::Tab));
        interpret_event(&mut state, press(KeyCode::Tab));
        assert!(matches!(
            interpret_event(&mut state, press(KeyCode::Enter)),
            Some(UserEvent::RunBob)
        ));
    }

    #[test]
    fn interpret_event__password_modal_escape_declines() {
        // given
        let mut state = UiState::new(true);
        interpret_event(&mut state, press(KeyCode::F(2)));

        // when
        interpret_event(&mut state, press(KeyCode::Char('x')));
        let ev = interpret_event(&mut state, press(KeyCode::Esc));

        // then
        assert!(matches!(ev, Some(UserEvent::DeclinePassword)));
        assert!(matches!(state.mode, Mode::Normal));
    }

    #[test]
    fn interpret_event__password_modal_enter_connects() {
        let mut state = UiState::new(true);
        interpret_event(&mut state, press(KeyCode::F(2)));
        for c in "pw".chars() {
            interpret_event(&mut state, press(KeyCode::Char(c)));
        }
        match interpret_event(&mut state, press(KeyCode::Enter)) {
            Some(UserEvent::Connect(Some(password))) => assert_eq!(password, "pw"),
            _ => panic!("expected a connect with password"),
        }
    }

    #[test]
    fn interpret_event__faucet_key_ignored_without_faucet() {
        let mut state = UiState::new(false);
        assert!(interpret_event(&mut state, press(KeyCode::F(3))).is_none());
        state.has_faucet = true;
        assert!(matches!(
            interpret_event(&mut state, press(KeyCode::F(3))),
            Some(UserEvent::Fund)
        ));
    }
}
