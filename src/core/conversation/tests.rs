use super::*;

fn a() -> ActorName {
    ActorName::model("dummy", "a")
}

fn b() -> ActorName {
    ActorName::model("dummy", "b")
}

fn c() -> ActorName {
    ActorName::model("dummy", "c")
}

fn said(from: ActorName, to: ActorName, text: &str) -> Utterance {
    Utterance::new(from, Intention::to(to)).with_contents(Stream::text(text))
}

fn sample() -> Vec<Utterance> {
    vec![
        said(a(), b(), "a->b"),
        said(b(), a(), "b->a"),
        said(c(), b(), "c->b"),
    ]
}

fn names() -> HashMap<ActorName, String> {
    HashMap::from([(a(), "a".to_string()), (b(), "b".to_string())])
}

fn pairs(sau: &Sau) -> Vec<(&str, &str)> {
    sau.iter()
        .map(|m| (m.role.as_str(), m.content.as_str()))
        .collect()
}

#[test]
fn sau_conversion_keeps_order_and_defaults_unknown_names() {
    let uts = sample();
    let sau = uts_2sau(&uts, &names(), "?", Some("s"), None);
    assert_eq!(
        pairs(&sau),
        vec![("system", "s"), ("a", "a->b"), ("b", "b->a"), ("?", "c->b")]
    );
}

#[test]
fn sau_conversion_of_nothing_is_the_system_message() {
    let sau = uts_2sau(&[], &names(), "?", Some("s"), None);
    assert_eq!(pairs(&sau), vec![("system", "s")]);
}

#[test]
fn sau_cache_reuses_prefixes_and_stays_bounded() {
    let mut uts = sample();
    let mut cache = SauCache::new(2);
    let first = uts_2sau(&uts[..2], &names(), "?", Some("s"), Some(&mut cache));
    assert_eq!(cache.len(), 1);

    let full = uts_2sau(&uts, &names(), "?", Some("s"), Some(&mut cache));
    assert_eq!(&full[..first.len()], &first[..]);
    assert_eq!(full.len(), 4);

    uts.push(said(a(), c(), "a->c"));
    uts_2sau(&uts, &names(), "?", Some("s"), Some(&mut cache));
    assert_eq!(cache.len(), 2);
}

#[test]
fn sau_cache_is_keyed_by_prompt() {
    let uts = sample();
    let mut cache = SauCache::default();
    uts_2sau(&uts, &names(), "?", Some("s"), Some(&mut cache));
    let other = uts_2sau(&uts, &names(), "?", Some("t"), Some(&mut cache));
    assert_eq!(pairs(&other)[0], ("system", "t"));
}

#[test]
fn lastref_of_an_empty_log_is_none() {
    assert_eq!(uts_lastref(&[], &a()), None);
}

#[test]
fn lastref_finds_the_last_utterance_addressed_to_an_actor() {
    let uts = sample();
    assert_eq!(uts_lastref(&uts, &a()), Some(1));
    assert_eq!(uts_lastref(&uts, &b()), Some(2));
    assert_eq!(uts_lastref(&uts, &c()), None);
}

#[test]
fn lastfullref_skips_empty_utterances() {
    let mut uts = sample();
    uts.push(Utterance::new(b(), Intention::to(a())));
    assert_eq!(uts_lastref(&uts, &a()), Some(3));
    assert_eq!(uts_lastfullref(&uts, &a()), Some(1));
    assert_eq!(uts_lastfull(&uts, &b()), Some(1));
}

#[test]
fn actor_names_render_provider_model_and_alias() {
    assert_eq!(ActorName::User.to_string(), "user");
    let name = ModelName::new("openai", "gpt-4o").with_alias("critic");
    assert_eq!(ActorName::Model(name).to_string(), "openai:gpt-4o(critic)");
}

#[test]
fn reset_empties_the_log() {
    let mut cnv = Conversation::new();
    cnv.push(Utterance::new(ActorName::User, Intention::exit()));
    assert_eq!(cnv.len(), 1);
    cnv.reset();
    assert!(cnv.is_empty());
}
