use std::str::FromStr;

use clap::{Arg, Command};

use ciws::logging::{ensure_log_directory, init_logging, parse_log_level, LogConfig, LogOutput};
use ciws::scenario::ScenarioConfig;
use ciws::simulation::{SimulationEngine, SimulationSummary};

/// `-t` で実行する組み込みシナリオ
const SELF_CHECK_SCENARIO: &str = include_str!("../scenarios/ciws_basic.yaml");

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("ciws")
        .version("0.1.0")
        .about("近接防御システム (Close-In Weapon System)")
        .long_about("目標追跡・誘導・誘導弾ライフサイクル管理エンジン\n\
                     シナリオに記述したハードウェア構成と接触に対して、ティック駆動で迎撃を再現します。")
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help("実行するシナリオファイル(.yaml)のパスを指定します。\n\
                           指定しない場合、使用方法を表示します。")
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
                .conflicts_with("test")
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .action(clap::ArgAction::SetTrue)
                .help("組み込みシナリオで動作確認を実行")
                .conflicts_with("info")
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)")
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .help("ログレベル (trace, debug, info, warn, error)")
        )
        .get_matches();

    println!("近接防御システム (Close-In Weapon System) - ciws v0.1.0");
    println!();

    // 詳細レベルの設定
    let verbose_level = matches.get_count("verbose");
    if verbose_level > 0 {
        println!("詳細出力レベル: {}", verbose_level);
    }

    // ログ設定
    let output = matches
        .get_one::<String>("log-output")
        .map(|s| LogOutput::from_str(s))
        .unwrap_or(Ok(LogOutput::Console));
    let output = match output {
        Ok(output) => output,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(2);
        }
    };
    let level = matches
        .get_one::<String>("log-level")
        .map_or(tracing::Level::INFO, |s| parse_log_level(s));
    let log_config = LogConfig {
        level,
        output,
        ..LogConfig::default()
    };
    if output != LogOutput::Console {
        if let Err(e) = ensure_log_directory(&log_config.log_dir) {
            eprintln!("エラー: ログディレクトリを作成できません: {}", e);
            std::process::exit(1);
        }
    }
    // ファイル出力のガードはmainの終わりまで保持する
    let _log_guard = match init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("エラー: ログを初期化できません: {}", e);
            std::process::exit(1);
        }
    };

    // 動作確認モードの実行
    if matches.get_flag("test") {
        println!("=== 組み込みシナリオによる動作確認 ===");
        if let Err(e) = run_self_check(verbose_level) {
            eprintln!("エラー: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // シナリオファイルの処理
    if let Some(scenario_path) = matches.get_one::<String>("scenario") {
        match run_scenario(scenario_path, matches.get_flag("info"), verbose_level) {
            Ok(_) => {
                if verbose_level > 0 {
                    println!("シナリオ実行が正常に完了しました。");
                }
            }
            Err(e) => {
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        // デフォルト動作: 使用方法を表示
        show_default_help();
    }
}

/// 組み込みシナリオを実行し、接触がすべて迎撃されたか確認
fn run_self_check(verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    let scenario: ScenarioConfig = serde_yaml::from_str(SELF_CHECK_SCENARIO)?;
    scenario.validate()?;

    let summary = execute_scenario(scenario, verbose_level)?;
    if summary.surviving_contacts > 0 {
        return Err(format!("{}機の接触が残っています", summary.surviving_contacts).into());
    }

    println!("\n全ての接触が迎撃されました！");
    Ok(())
}

/// シナリオファイルを読み込んで実行
fn run_scenario(scenario_path: &str, info_only: bool, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    // シナリオファイルの読み込み
    let scenario = ScenarioConfig::from_file(scenario_path)?;

    if verbose_level > 0 {
        println!("シナリオファイル読み込み完了: {}", scenario_path);
    }

    // 情報表示のみの場合
    if info_only {
        scenario.print_summary();
        return Ok(());
    }

    // シナリオ実行
    execute_scenario(scenario, verbose_level)?;

    Ok(())
}

/// シナリオの実行
fn execute_scenario(scenario: ScenarioConfig, verbose_level: u8) -> Result<SimulationSummary, Box<dyn std::error::Error>> {
    // 基本情報表示
    scenario.print_summary();
    println!();

    if verbose_level > 0 {
        println!("シミュレーション設定:");
        println!("  時間刻み: {:.1}ミリ秒", scenario.sim.dt_ms);
        println!("  最大時間: {:.1}秒", scenario.sim.t_max_s);
        println!("  命令: {}件", scenario.orders.len());
        println!();
    }

    // シミュレーションエンジンの作成と初期化
    let mut simulation = SimulationEngine::new(scenario, verbose_level)?;
    simulation.initialize()?;

    // シミュレーション実行
    let summary = simulation.run();
    print_summary(&summary);

    Ok(summary)
}

/// 実行結果と最終の状態表示を出力
fn print_summary(summary: &SimulationSummary) {
    println!("=== 実行結果 ===");
    println!("経過時間: {:.1}秒 ({}ステップ)", summary.elapsed_ms / 1000.0, summary.steps);
    println!("残存接触: {}機", summary.surviving_contacts);
    println!("誘導弾: 飛行中{}発, 発射待ち{}発", summary.active_munitions, summary.pending_munitions);
    println!();
    match &summary.last_status {
        Some(status) => {
            println!("=== 最終状態表示 ===");
            println!("{}", status);
        }
        None => println!("状態表示は出力されませんでした"),
    }
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  ciws [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>     シナリオファイルを指定して実行");
    println!("  -i, --info                シナリオ情報のみ表示");
    println!("  -t, --test                組み込みシナリオで動作確認");
    println!("  -v, --verbose             詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-output <OUTPUT> ログ出力先 (console, file, both)");
    println!("      --log-level <LEVEL>   ログレベル (trace, debug, info, warn, error)");
    println!("  -h, --help                このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/ciws_basic.yaml    - 単目標迎撃の基本シナリオ");
    println!("  scenarios/ciws_salvo.yaml    - 複数目標への一斉発射と自爆");
    println!();
    println!("例:");
    println!("  ciws -s scenarios/ciws_basic.yaml");
    println!("  ciws -s scenarios/ciws_salvo.yaml -v");
    println!("  ciws -s scenarios/ciws_basic.yaml -i");
    println!("  ciws --test --log-output both");
}
