//! End-to-end routing through parsed configurations.

use std::sync::Arc;

use logroute::event::LogEvent;
use logroute::layout::Layout;
use logroute::LogLevel;

mod common;

#[test]
fn test_min_level_rule_filters_debug() {
    let factory = common::factory(1000);
    let config = factory
        .load_configuration_from_str(
            "<nlog>
               <targets><target type='Memory' name='d1' layout='${message}'/></targets>
               <rules><logger name='*' minLevel='Info' writeTo='d1'/></rules>
             </nlog>",
            None,
        )
        .unwrap();
    let logger = factory.get_logger("A");
    logger.debug("hidden");
    logger.info("shown");
    assert_eq!(common::memory(&config, "d1").logs(), vec!["shown"]);
}

#[test]
fn test_same_target_in_two_rules_receives_event_twice() {
    let factory = common::factory(1000);
    let config = factory
        .load_configuration_from_str(
            "<nlog>
               <targets><target type='Memory' name='d1' layout='${message}'/></targets>
               <rules>
                 <logger name='*' writeTo='d1'/>
                 <logger name='*' writeTo='d1,d1'/>
               </rules>
             </nlog>",
            None,
        )
        .unwrap();
    factory.get_logger("A").info("x");
    assert_eq!(common::memory(&config, "d1").logs(), vec!["x", "x"]);
}

#[test]
fn test_final_rule_only_stops_its_levels() {
    let factory = common::factory(1000);
    let config = factory
        .load_configuration_from_str(
            "<nlog>
               <targets>
                 <target type='Memory' name='first' layout='${message}'/>
                 <target type='Memory' name='rest' layout='${message}'/>
               </targets>
               <rules>
                 <logger name='App.*' level='Error' writeTo='first' final='true'/>
                 <logger name='*' writeTo='rest'/>
               </rules>
             </nlog>",
            None,
        )
        .unwrap();
    let logger = factory.get_logger("App.Db");
    logger.error("boom");
    logger.info("fine");
    factory.get_logger("Other").error("elsewhere");

    assert_eq!(common::memory(&config, "first").logs(), vec!["boom"]);
    assert_eq!(common::memory(&config, "rest").logs(), vec!["fine", "elsewhere"]);
}

#[test]
fn test_final_min_level_lets_lower_levels_through() {
    let factory = common::factory(1000);
    let config = factory
        .load_configuration_from_str(
            "<nlog>
               <targets>
                 <target type='Memory' name='noisy' layout='${message}'/>
                 <target type='Memory' name='all' layout='${message}'/>
               </targets>
               <rules>
                 <logger name='Noisy.*' finalMinLevel='Warn' writeTo='noisy'/>
                 <logger name='*' writeTo='all'/>
               </rules>
             </nlog>",
            None,
        )
        .unwrap();
    let logger = factory.get_logger("Noisy.Cache");
    logger.info("chatter");
    logger.warn("problem");

    assert_eq!(common::memory(&config, "noisy").logs(), vec!["problem"]);
    assert_eq!(common::memory(&config, "all").logs(), vec!["chatter"]);
}

#[test]
fn test_filters_drop_and_stop() {
    let factory = common::factory(1000);
    let config = factory
        .load_configuration_from_str(
            "<nlog>
               <targets><target type='Memory' name='m' layout='${message}'/></targets>
               <rules>
                 <logger name='*' writeTo='m'>
                   <filters defaultAction='Log'>
                     <whenContains layout='${message}' substring='secret' action='IgnoreFinal'/>
                     <whenContains layout='${message}' substring='s' action='Log'/>
                   </filters>
                 </logger>
               </rules>
             </nlog>",
            None,
        )
        .unwrap();
    let logger = factory.get_logger("A");
    logger.info("a secret");
    logger.info("plain");
    assert_eq!(common::memory(&config, "m").logs(), vec!["plain"]);
}

#[test]
fn test_variables_render_around_message_with_three_nodes() {
    let factory = common::factory(1000);
    let config = factory
        .load_configuration_from_str(
            "<nlog>
               <variable name='prefix' value='[['/>
               <variable name='suffix' value=']]'/>
               <targets><target type='Memory' name='m' layout='${prefix}${message}${suffix}'/></targets>
               <rules><logger name='*' writeTo='m'/></rules>
             </nlog>",
            None,
        )
        .unwrap();
    let memory = common::memory(&config, "m");
    assert_eq!(memory.layout().node_count(), 3);

    let logger = factory.get_logger("A");
    for message in ["", "hello", "with ]] inside"] {
        logger.info(message);
    }
    assert_eq!(memory.logs(), vec!["[[]]", "[[hello]]", "[[with ]] inside]]"]);
}

#[test]
fn test_cached_layout_returns_same_instance() {
    let layout = Layout::parse("${guid:cached=true}|${message}").unwrap();
    let event = LogEvent::new(LogLevel::Info, "A", "msg");
    let first = layout.render(&event);
    let second = layout.render(&event);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_child_rules_run_before_parent_final() {
    let factory = common::factory(1000);
    let config = factory
        .load_configuration_from_str(
            "<nlog>
               <targets>
                 <target type='Memory' name='db' layout='${message}'/>
                 <target type='Memory' name='rest' layout='${message}'/>
               </targets>
               <rules>
                 <logger name='App.*' final='true'>
                   <logger name='App.Db' writeTo='db'/>
                 </logger>
                 <logger name='*' writeTo='rest'/>
               </rules>
             </nlog>",
            None,
        )
        .unwrap();
    factory.get_logger("App.Db").info("query");
    factory.get_logger("App.Web").info("request");
    factory.get_logger("Other").info("other");

    assert_eq!(common::memory(&config, "db").logs(), vec!["query"]);
    assert_eq!(common::memory(&config, "rest").logs(), vec!["other"]);
}

#[test]
fn test_programmatic_configuration_routes_events() {
    let factory = common::factory(1000);
    let target = Arc::new(logroute::targets::MemoryTarget::with_message_layout("m"));
    let mut config = factory.new_configuration();
    config.add_rule_for_levels(LogLevel::Warn, LogLevel::Fatal, target.clone(), "Svc.*");
    factory.set_configuration(Some(config)).unwrap();

    factory.get_logger("Svc.A").warn("w");
    factory.get_logger("Svc.A").info("i");
    factory.get_logger("Other").error("e");
    assert_eq!(target.logs(), vec!["w"]);
}

#[test]
fn test_async_wrapper_delivers_after_flush() {
    let factory = common::factory(1000);
    let config = factory
        .load_configuration_from_str(
            "<nlog>
               <targets async='true'><target type='Memory' name='m' layout='${logger}|${message}'/></targets>
               <rules><logger name='*' writeTo='m'/></rules>
             </nlog>",
            None,
        )
        .unwrap();
    let logger = factory.get_logger("Worker");
    for i in 0..50 {
        logger.info(format!("event {}", i));
    }
    factory.flush().unwrap();

    let inner = config
        .find_target_by_name("m")
        .unwrap()
        .wrapped_targets()
        .remove(0);
    let memory = logroute::targets::downcast_target::<logroute::targets::MemoryTarget>(&inner).unwrap();
    assert_eq!(memory.len(), 50);
    assert_eq!(memory.logs()[0], "Worker|event 0");
    factory.shutdown();
}
