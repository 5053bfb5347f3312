use super::*;
use crate::core::conversation::{Modality, ModelName};
use crate::utils::test_utils::CaptureSink;
use tempfile::TempDir;

fn repl() -> (Repl, CaptureSink) {
    let sink = CaptureSink::new();
    let repl = Repl::new(ActorName::User, sink.boxed(), Logger::default());
    (repl, sink)
}

fn dummy() -> ActorName {
    ActorName::Model(ModelName::new("dummy", "default"))
}

fn paused_utterance(res: Interpretation) -> Utterance {
    match res.pause {
        Some(Pause::Utterance(ut)) => ut,
        other => panic!("expected an utterance, got {other:?}"),
    }
}

#[tokio::test]
async fn ask_ships_the_message_to_the_selected_model() {
    let (mut repl, _) = repl();
    let chunk = "/model dummy\nhello\n/ask";
    let res = repl.interpret(chunk).await;
    assert!(res.errors.is_empty());
    assert_eq!(res.consumed, chunk.len());

    let ut = paused_utterance(res);
    assert_eq!(ut.actor_name, ActorName::User);
    assert_eq!(ut.intention.actor_next, Some(dummy()));
    assert!(ut.intention.actor_updates.contains_key(&dummy()));
    assert_eq!(ut.text(), "hello");
    assert!(repl.buffers.get(IN).is_empty());
}

#[tokio::test]
async fn ask_without_a_model_keeps_the_message() {
    let (mut repl, _) = repl();
    let res = repl.interpret("hello\n/ask").await;
    assert!(res.pause.is_none());
    assert!(matches!(
        res.errors.as_slice(),
        [ReplError::Conversation(ConversationError::NoActiveModel)]
    ));
    assert_eq!(repl.buffers.text(IN), "hello\n");
}

#[tokio::test]
async fn blank_input_asks_with_empty_contents() {
    let (mut repl, _) = repl();
    let ut = paused_utterance(repl.interpret("/model dummy\n  \n/ask").await);
    assert!(ut.is_empty());
}

#[tokio::test]
async fn pausing_commands_leave_the_rest_unconsumed() {
    let (mut repl, _) = repl();
    let chunk = "/exit\nrest of input";
    let res = repl.interpret(chunk).await;
    assert_eq!(&chunk[res.consumed..], "rest of input");
    let ut = paused_utterance(res);
    assert!(ut.intention.exit_flag);
    assert!(repl.buffers.get(IN).is_empty());
}

#[tokio::test]
async fn a_bad_command_does_not_abort_the_chunk() {
    let (mut repl, _) = repl();
    let res = repl
        .interpret("/set model colour red\nhello\n/cat \"unterminated\n/model dummy\n/ask")
        .await;
    assert_eq!(res.errors.len(), 2);
    assert!(matches!(res.errors[0], ReplError::Parse(_)));
    assert_eq!(paused_utterance(res).text(), "hello");
}

#[tokio::test]
async fn reset_clears_buffers_and_pauses() {
    let (mut repl, _) = repl();
    repl.buffers.push_text(OUT, "old answer");
    let ut = paused_utterance(repl.interpret("draft\n/reset").await);
    assert!(ut.intention.reset_flag);
    assert!(repl.buffers.get(IN).is_empty());
    assert!(repl.buffers.get(OUT).is_empty());
}

#[tokio::test]
async fn dbg_pauses_with_the_debugger_flag() {
    let (mut repl, _) = repl();
    let ut = paused_utterance(repl.interpret("/dbg").await);
    assert!(ut.intention.dbg_flag);
}

#[tokio::test]
async fn echo_prints_the_rest_of_the_line() {
    let (mut repl, sink) = repl();
    repl.interpret("/echo   hi there\nnext").await;
    assert_eq!(sink.contents(), "hi there\n");
    assert_eq!(repl.buffers.text(IN), "next");
}

#[tokio::test]
async fn echo_is_closed_by_a_following_command() {
    let (mut repl, sink) = repl();
    repl.interpret("/echo hi/echo there\n").await;
    assert_eq!(sink.contents(), "hi\nthere\n");
}

#[tokio::test]
async fn bare_shell_arguments_are_verbatim() {
    let (mut repl, sink) = repl();
    let res = repl.interpret("/shell \"echo from-shell\"").await;
    assert!(res.errors.is_empty());
    assert_eq!(sink.contents(), "from-shell\n");
    assert_eq!(
        repl.resolve(&RefArg::bare("x"), RefSchema::Verbatim).unwrap(),
        Ref::new(RefSchema::Verbatim, "x")
    );
}

#[tokio::test]
async fn bare_cat_arguments_are_buffers() {
    let (mut repl, sink) = repl();
    let res = repl
        .interpret("/cp verbatim:\"some text\" notes\n/cat notes")
        .await;
    assert!(res.errors.is_empty());
    assert_eq!(sink.contents(), "some text\n");
}

#[tokio::test]
async fn append_extends_a_buffer() {
    let (mut repl, _) = repl();
    repl.interpret("/cp verbatim:a b\n/append verbatim:c b\n").await;
    assert_eq!(repl.buffers.text("b"), "ac");
}

#[tokio::test]
async fn copies_go_through_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("note.txt");
    let (mut repl, _) = repl();
    let chunk = format!(
        "/cp verbatim:saved file:\"{p}\"\n/cp verbatim:\"{p}\" where\n/cp file(where) copy\n",
        p = path.display()
    );
    let res = repl.interpret(&chunk).await;
    assert!(res.errors.is_empty(), "{:?}", res.errors);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "saved");
    assert_eq!(repl.buffers.text("copy"), "saved");
}

#[tokio::test]
async fn clear_requires_a_buffer() {
    let (mut repl, _) = repl();
    let res = repl.interpret("/clear file:x.txt").await;
    assert!(matches!(
        res.errors.as_slice(),
        [ReplError::Reference(ReferenceError::NotABuffer(_))]
    ));
}

#[tokio::test]
async fn pipe_feeds_a_buffer_through_a_command() {
    let (mut repl, _) = repl();
    let res = repl
        .interpret("/cp verbatim:\"b\na\n\" src\n/pipe sort src dst\n")
        .await;
    assert!(res.errors.is_empty(), "{:?}", res.errors);
    assert_eq!(repl.buffers.text("dst"), "a\nb\n");
}

#[tokio::test]
async fn model_settings_need_a_selected_model() {
    let (mut repl, _) = repl();
    let res = repl.interpret("/set model temp 0.5").await;
    assert_eq!(res.errors.len(), 1);

    let res = repl
        .interpret("/model dummy\n/set model temp 0.5\n/set model modality img\n/set model apikey verbatim:sk-1\n")
        .await;
    assert!(res.errors.is_empty());
    let opts = &repl.view().options[&dummy()];
    assert_eq!(opts.temperature, Some(0.5));
    assert_eq!(opts.modality, Modality::Image);
    assert_eq!(opts.apikey.as_deref(), Some("sk-1"));
}

#[tokio::test]
async fn read_model_prompt_moves_the_message_buffer() {
    let (mut repl, _) = repl();
    repl.interpret("/model dummy\n  be brief  \n/read model prompt\n")
        .await;
    assert_eq!(
        repl.view().options[&dummy()].prompt.as_deref(),
        Some("be brief")
    );
    assert!(repl.buffers.get(IN).is_empty());
}

#[tokio::test]
async fn terminal_settings_apply_locally() {
    let (mut repl, _) = repl();
    let res = repl
        .interpret("/set terminal rawbin on\n/set term width 60\n/set terminal prompt \"? \"\n")
        .await;
    assert!(res.errors.is_empty());
    assert!(repl.terminal.rawbin);
    assert_eq!(repl.terminal.width, Some(60));
    assert_eq!(repl.terminal.prompt, "? ");
}

#[tokio::test]
async fn paste_mode_collects_raw_lines() {
    let (mut repl, _) = repl();
    let chunk = "/paste on\nleftover";
    let res = repl.interpret(chunk).await;
    assert!(matches!(res.pause, Some(Pause::Paste)));
    assert_eq!(&chunk[res.consumed..], "leftover");
    assert!(repl.in_paste_mode());

    assert!(repl.paste_line("/ask is just text here"));
    assert!(!repl.paste_line("  /paste off"));
    assert!(!repl.in_paste_mode());
    assert_eq!(repl.buffers.text(IN), "/ask is just text here\n");
}

#[tokio::test]
async fn recording_mirrors_lines_into_the_target() {
    let (mut repl, _) = repl();
    repl.interpret("/set terminal recording buf:rec\n").await;
    repl.record("hello").unwrap();
    let rec = repl.buffers.text("rec");
    assert!(rec.starts_with("# recording started at "));
    assert!(rec.ends_with("hello\n"));

    let res = repl.interpret("/set terminal recording verbatim:x\n").await;
    assert!(matches!(
        res.errors.as_slice(),
        [ReplError::Reference(ReferenceError::ReadOnly(_))]
    ));
}

#[tokio::test]
async fn escapes_and_comments_shape_the_message() {
    let (mut repl, _) = repl();
    let ut = paused_utterance(
        repl.interpret("/model dummy\na \\/ask b # hidden\n/ask")
            .await,
    );
    assert_eq!(ut.text(), "a /ask b");
}

#[tokio::test]
async fn adopted_views_do_not_override_local_edits() {
    let (mut repl, _) = repl();
    repl.interpret("/model dummy\n/set model seed 7\n").await;
    let mut session_view = ActorView::default();
    session_view
        .options
        .insert(dummy(), ActorOptions::default());
    let other = ActorName::Model(ModelName::new("openai", "gpt-4o"));
    session_view.options.insert(other.clone(), ActorOptions::default());
    repl.adopt_view(&session_view);
    assert_eq!(repl.view().options[&dummy()].seed, Some(7));
    assert!(repl.view().options.contains_key(&other));
}

#[tokio::test]
async fn completion_sees_buffers_written_by_commands() {
    let (mut repl, _) = repl();
    repl.interpret("/cp verbatim:hi buffer:scratch").await;
    assert_eq!(repl.complete("/cat buffer:scr"), vec!["/cat buffer:scratch"]);
    assert_eq!(repl.complete("/pa"), vec!["/paste"]);
}

#[tokio::test]
async fn pauses_ship_only_changed_options() {
    let (mut repl, _) = repl();
    let other = ActorName::Model(ModelName::new("openai", "gpt-4o"));
    let ut = paused_utterance(repl.interpret("/model openai:gpt-4o\n/model dummy\n/ask").await);
    assert_eq!(ut.intention.actor_updates.len(), 2);

    let mut session_view = ActorView::default();
    session_view.options.insert(dummy(), ActorOptions::default());
    session_view.options.insert(other, ActorOptions::default());
    repl.adopt_view(&session_view);

    let ut = paused_utterance(repl.interpret("/exit").await);
    assert!(ut.intention.actor_updates.is_empty());
    let ut = paused_utterance(repl.interpret("/set model seed 3\n/ask").await);
    assert_eq!(ut.intention.actor_updates.len(), 1);
    assert_eq!(ut.intention.actor_updates[&dummy()].seed, Some(3));
}

#[tokio::test]
async fn actors_the_session_could_not_create_are_forgotten() {
    let (mut repl, _) = repl();
    let bogus = ActorName::Model(ModelName::new("bogus", "x"));
    paused_utterance(repl.interpret("/model bogus:x\n/ask").await);
    repl.adopt_view(&ActorView::default());

    assert!(!repl.view().options.contains_key(&bogus));
    assert_eq!(repl.actor_next(), None);
    let ut = paused_utterance(repl.interpret("/exit").await);
    assert!(ut.intention.actor_updates.is_empty());
}

#[tokio::test]
async fn slashes_that_start_no_command_are_text() {
    let (mut repl, _) = repl();
    let res = repl
        .interpret("/model dummy\nwhat is 1/2 of http://x.org/a ?\n/usr/bin is a path\n/ask")
        .await;
    assert!(res.errors.is_empty());
    assert_eq!(
        paused_utterance(res).text(),
        "what is 1/2 of http://x.org/a ?\n/usr/bin is a path"
    );
}
